use chatline::{ChatApp, ChatSession, SettingsStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with the conversation on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(
        config_path = %settings_store.config_path().display(),
        model = %settings.model,
        "loaded settings"
    );

    let session = match ChatSession::from_settings(&settings).await {
        Ok(session) => session,
        Err(error) => {
            tracing::error!("failed to start chat session: {error}");
            std::process::exit(1);
        }
    };

    let mut app = ChatApp::new(session);
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    if let Err(error) = app.run(input, &mut output).await {
        tracing::error!("chat terminated: {error}");
        std::process::exit(1);
    }
}
