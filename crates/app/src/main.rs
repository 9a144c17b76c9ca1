use anyhow::{Context, Result};
use app::shell::{self, Command, Printer};
use app::{
    utils, ChatCoordinator, DisplayState, ImageCoordinator, RequestHandle, UpdateQueue,
    UpdateSender,
};
use providers::OpenAIClient;
use services::credentials::{resolve_api_key, save_api_key, CredentialStore, KeyringStore};
use services::{ImageCache, MessageStore};
use shared::settings::{model_display_name, AppSettings};
use std::io::Stdout;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

type Input = Lines<BufReader<Stdin>>;

fn init_tracing() {
    // stderr keeps the transcript on stdout clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_dir = utils::config_dir()?;
    let settings_path = config_dir.join(utils::SETTINGS_FILE_NAME);
    let (mut settings, _) = utils::load_settings_or_default(&settings_path);

    // No chat without a store.
    let store = MessageStore::open(&config_dir.join(utils::DB_FILE_NAME))
        .context("Database Error: could not open the message store")?;

    let mut input: Input = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = Printer::new(std::io::stdout());

    let keystore = KeyringStore;
    let api_key = match resolve_api_key(&keystore) {
        Some(key) => Zeroizing::new(key),
        None => match prompt_for_api_key(&keystore, &mut input, &mut printer).await? {
            Some(key) => key,
            None => return Ok(()),
        },
    };
    let client = Arc::new(OpenAIClient::new(api_key.as_str(), settings.base_url())?);
    drop(api_key);

    let runtime = tokio::runtime::Handle::current();
    let (updates, mut queue) = UpdateQueue::new();
    let chat = ChatCoordinator::new(
        store.clone(),
        client.clone(),
        updates.clone(),
        runtime.clone(),
    );
    let images = ImageCoordinator::new(
        client,
        Arc::new(ImageCache::new(&config_dir)),
        updates.clone(),
        runtime,
        settings.image_model.clone(),
    );

    let mut display = DisplayState::default();
    match store.list_all() {
        Ok(history) => {
            printer.history(&history)?;
            display.rehydrate(&history);
        }
        Err(e) => {
            tracing::warn!("failed to load chat history: {:#}", e);
            updates.status("Error loading chat history");
        }
    }
    printer.line(&format!(
        "model {} at temperature {:.1}; /help for commands",
        settings.chat_model, settings.temperature
    ))?;

    // Requests still running; joined before exit so exports finish.
    let mut pending: Vec<RequestHandle> = Vec::new();

    loop {
        pending.retain(|handle| !handle.is_finished());
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match shell::parse_command(&line) {
                    Command::Chat(text) => {
                        let dispatch = chat.send(&text, &settings.chat_model, settings.temperature);
                        pending.extend(dispatch.into_handle());
                    }
                    Command::Image(prompt) => {
                        pending.extend(images.generate(&prompt).into_handle());
                    }
                    Command::Save(path) => {
                        pending.extend(images.save(&path).into_handle());
                    }
                    Command::Cancel => {
                        let cancelled = chat.cancel() | images.cancel();
                        if !cancelled {
                            printer.line("nothing to cancel")?;
                        }
                    }
                    Command::Model(id) => {
                        settings.chat_model = id;
                        persist_settings(&settings_path, &settings, &updates);
                    }
                    Command::Temperature(value) => {
                        settings.set_temperature(value);
                        persist_settings(&settings_path, &settings, &updates);
                    }
                    Command::Models => printer.line(&shell::model_list())?,
                    Command::Help => printer.line(shell::HELP)?,
                    Command::Quit => break,
                    Command::Invalid(message) => printer.line(&message)?,
                }
            }
            Some(update) = queue.recv() => {
                printer.render(&update)?;
                display.apply(update);
            }
        }
    }

    if chat.is_busy() || images.is_busy() {
        tracing::info!("cancelling running requests");
    }
    chat.cancel();
    images.cancel();
    for handle in pending {
        handle.join().await;
    }
    while let Some(update) = queue.try_next() {
        printer.render(&update)?;
        display.apply(update);
    }

    images.shutdown();
    let line_count = display.lines.len();
    tracing::info!(lines = line_count, "session closed");
    Ok(())
}

fn persist_settings(path: &Path, settings: &AppSettings, updates: &UpdateSender) {
    match utils::save_settings(path, settings) {
        Ok(()) => updates.status(format!(
            "Using {} at temperature {:.1}",
            model_display_name(&settings.chat_model).unwrap_or(&settings.chat_model),
            settings.temperature
        )),
        Err(e) => updates.status(format!("Error saving settings: {:#}", e)),
    }
}

/// Ask once for the key and remember it in the key-store.
/// `None` when stdin closes before a key is entered.
async fn prompt_for_api_key(
    keystore: &dyn CredentialStore,
    input: &mut Input,
    printer: &mut Printer<Stdout>,
) -> Result<Option<Zeroizing<String>>> {
    loop {
        printer.line("Please enter your OpenAI API key:")?;
        let Some(line) = input.next_line().await? else {
            return Ok(None);
        };
        let key = Zeroizing::new(line.trim().to_string());
        if key.is_empty() {
            continue;
        }
        if let Err(e) = save_api_key(keystore, &key) {
            tracing::warn!("failed to store API key: {:#}", e);
            printer.line("Failed to save API key; it will only be used for this session")?;
        }
        return Ok(Some(key));
    }
}
