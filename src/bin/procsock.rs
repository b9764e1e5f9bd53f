// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use clap::Parser;
use dotenv::dotenv;
use procsock::message::{Compressed, EValue, RawBytes};
use procsock::network::Connection;
use procsock::processing::{
    ExtendedJsonFormat, JsonFormat, Params, PayloadFormat, ProcessError, ProcessingClient,
    ProcessingService,
};
use procsock::service::{NetworkConfig, PayloadEncoding};
use procsock::{setup_tracing, AppConfig, AppError, AppResult, Client, Exchange, Server};
use serde_json::Value;
use tokio::{runtime, signal};
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Command,
    /// log level (v: info, vv: debug, vvv: trace), overrides log.filter
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// Run a processing server that echoes the request data back
    Serve {
        /// make every Nth request fail
        #[arg(long)]
        fail_every: Option<u64>,
    },
    /// Send one processing request and print the result
    Query {
        /// request data as JSON
        #[arg(long)]
        data: String,
        /// processing parameters as JSON
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Send bytes without any framing and print what comes back
    SendRaw { text: String },
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let mut app_config = AppConfig::set_up_config(config_path)?;
    match commandline.verbose {
        0 => {}
        1 => app_config.log.filter = "info".to_string(),
        2 => app_config.log.filter = "debug".to_string(),
        _ => app_config.log.filter = "trace".to_string(),
    }

    if let Command::PrintConfig = commandline.command {
        let text = serde_json::to_string_pretty(&app_config)
            .map_err(|e| AppError::Encode(format!("config: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let _log_guard = setup_tracing(&app_config.log)?;

    rt.block_on(run(commandline.command, app_config))
}

async fn run(command: Command, app_config: AppConfig) -> AppResult<()> {
    let network = app_config.network;
    match command {
        Command::Serve { fail_every } => {
            let limit = network.max_package_size;
            match (network.format, network.compress) {
                (PayloadEncoding::Json, false) => {
                    serve(JsonFormat::<Value>::new(), network, fail_every).await
                }
                (PayloadEncoding::Json, true) => {
                    let format = compressed(JsonFormat::<Value>::new(), &network, limit);
                    serve(format, network, fail_every).await
                }
                (PayloadEncoding::Ejson, false) => {
                    serve(ExtendedJsonFormat::<EValue>::new(), network, fail_every).await
                }
                (PayloadEncoding::Ejson, true) => {
                    let format = compressed(ExtendedJsonFormat::<EValue>::new(), &network, limit);
                    serve(format, network, fail_every).await
                }
            }
        }
        Command::Query { data, params } => {
            let data = parse_json("--data", &data)?;
            let params = parse_json("--params", &params)?;
            let limit = app_config.client.max_package_size;
            let client = Client::new(app_config.client);
            let result = match (network.format, network.compress) {
                (PayloadEncoding::Json, false) => {
                    query(client, JsonFormat::<Value>::new(), data, params).await?
                }
                (PayloadEncoding::Json, true) => {
                    let format = compressed(JsonFormat::<Value>::new(), &network, limit);
                    query(client, format, data, params).await?
                }
                (PayloadEncoding::Ejson, false) => {
                    query(client, ExtendedJsonFormat::<EValue>::new(), data, params).await?
                }
                (PayloadEncoding::Ejson, true) => {
                    let format = compressed(ExtendedJsonFormat::<EValue>::new(), &network, limit);
                    query(client, format, data, params).await?
                }
            };
            let text = serde_json::to_string_pretty(&result)
                .map_err(|e| AppError::Encode(format!("result: {e}")))?;
            println!("{text}");
            Ok(())
        }
        Command::SendRaw { text } => {
            let reply = Client::new(app_config.client)
                .query(RawExchange(Bytes::from(text)))
                .await?;
            println!("{}", String::from_utf8_lossy(&reply));
            Ok(())
        }
        Command::PrintConfig => Ok(()),
    }
}

/// Wraps `format` with the configured level, inflating at most `limit`
/// bytes per envelope.
fn compressed<F>(format: F, network: &NetworkConfig, limit: usize) -> Compressed<F>
where
    F: PayloadFormat,
{
    Compressed::new(format)
        .with_level(network.compression_level)
        .with_max_decompressed(limit)
}

async fn serve<F>(format: F, network: NetworkConfig, fail_every: Option<u64>) -> AppResult<()>
where
    F: PayloadFormat,
{
    let served = AtomicU64::new(0);
    let service = ProcessingService::new(format, move |data: F::Data, _params: Params| {
        let n = served.fetch_add(1, Ordering::Relaxed) + 1;
        match fail_every {
            Some(every) if every > 0 && n % every == 0 => Err(ProcessError::new(
                "InjectedFailure",
                format!("request {n} fails on purpose"),
            )),
            _ => Ok(data),
        }
    });
    let server = Server::bind(network, service).await?;
    info!("serving on {}", server.local_addr());
    server.run(signal::ctrl_c()).await
}

/// Request data as typed on the command line.
trait CliData: Sized {
    fn from_cli(value: Value) -> Self;
    fn into_cli(self) -> AppResult<Value>;
}

impl CliData for Value {
    fn from_cli(value: Value) -> Self {
        value
    }

    fn into_cli(self) -> AppResult<Value> {
        Ok(self)
    }
}

impl CliData for EValue {
    fn from_cli(value: Value) -> Self {
        EValue::from(value)
    }

    // tagged form, so arrays and bytes print too
    fn into_cli(self) -> AppResult<Value> {
        Ok(self.to_json())
    }
}

async fn query<F>(client: Client, format: F, data: Value, params: Params) -> AppResult<Value>
where
    F: PayloadFormat,
    F::Data: CliData,
{
    let client = ProcessingClient::new(client, format);
    client
        .process(F::Data::from_cli(data), params)
        .await?
        .into_cli()
}

fn parse_json(flag: &str, text: &str) -> AppResult<Value> {
    serde_json::from_str(text).map_err(|e| AppError::InvalidValue(format!("{flag}: {e}")))
}

/// Writes the bytes unframed, then reads until the server closes.
struct RawExchange(Bytes);

impl Exchange for RawExchange {
    type Output = Bytes;

    async fn communicate(self, connection: &mut Connection) -> AppResult<Bytes> {
        let raw = RawBytes::new();
        connection.send(&raw, &self.0).await?;
        connection.recv(&raw).await
    }
}
