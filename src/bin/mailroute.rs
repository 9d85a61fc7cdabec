use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use mailroute::service::setup_local_tracing;
use mailroute::{
    level_directive, AppError, AppResult, Daemon, MailRouteConfig, MapResponse, NetstringCodec,
    RequestFrame,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

#[derive(Parser)]
#[command(version, about = "socketmap lookup daemon for mail routing")]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// print the effective configuration and exit
    PrintConfig,
    /// send one lookup to a running daemon and print the answer
    Query {
        /// map name, `domains` or `mailboxes`
        map: String,
        key: String,
        /// daemon address, defaults to the configured listen address
        #[arg(long)]
        addr: Option<String>,
    },
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let (config_path, required) = commandline
        .conf
        .as_ref()
        .map_or_else(|| (MailRouteConfig::default_path(), false), |path| (PathBuf::from(path), true));

    match commandline.command {
        Some(Command::PrintConfig) => {
            let config = MailRouteConfig::set_up_config(config_path, required)?;
            println!("{:#?}", config);
            Ok(())
        }
        Some(Command::Query { map, key, addr }) => {
            let addr = match addr {
                Some(addr) => addr,
                None => MailRouteConfig::set_up_config(config_path, required)?
                    .network
                    .listen_address()?
                    .to_string(),
            };
            let rt = runtime::Builder::new_current_thread().enable_all().build()?;
            rt.block_on(async {
                setup_local_tracing()?;
                let response = query(&addr, RequestFrame::new(map, key)).await?;
                println!("{}", response.text());
                Ok(())
            })
        }
        None => {
            let config = MailRouteConfig::set_up_config(config_path, required)?;
            Daemon::new(config).start(level_directive(commandline.verbose))
        }
    }
}

async fn query(addr: &str, request: RequestFrame) -> AppResult<MapResponse> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(&request.encode()).await?;
    writer.flush().await?;

    let mut responses = FramedRead::new(reader, NetstringCodec::new(64 * 1024));
    match responses.next().await {
        Some(payload) => MapResponse::from_payload(&payload?),
        None => Err(AppError::IllegalStateError(
            "daemon closed the connection without answering".to_string(),
        )),
    }
}
