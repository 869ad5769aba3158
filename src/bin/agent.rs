use std::sync::Arc;

use structopt::StructOpt;

use relaylink::cli::Cli;
use relaylink::config::AgentConfig;
use relaylink::handler::{CommandHandler, EchoHandler};
use relaylink::logging;
use relaylink::transport::Session;

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::from_args();
    logging::init(cli.verbose);

    let config_path = cli
        .config
        .or_else(relaylink::config::default_config_path)
        .ok_or_else(|| anyhow::anyhow!("no --config given and no default configuration path found"))?;
    let config = AgentConfig::load(&config_path).await?;
    let cipher = config.cipher()?.map(|c| Arc::new(c) as Arc<dyn relaylink::crypto::Cipher>);
    let url = cli.url.unwrap_or(config.url);

    #[cfg(unix)]
    let session = Arc::new(Session::with_inherited_socket(
        url,
        config.timeouts,
        config.server_name,
        cipher,
        cli.inherited_fd,
    ));
    #[cfg(not(unix))]
    let session = Arc::new(Session::new(url, config.timeouts, config.server_name, cipher));
    session.init().await?;

    let handler: Arc<dyn CommandHandler> = Arc::new(EchoHandler);
    session.dispatch(handler).await?;
    Ok(())
}
