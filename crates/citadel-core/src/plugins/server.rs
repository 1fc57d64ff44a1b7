//! Plugin-side request loop.

use serde_json::Value;
use std::env;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::errors::PluginError;
use crate::plugins::protocol::{Method, Request, Response};
use crate::plugins::{HandshakeConfig, NodePlugin, PROTOCOL_VERSION_ENV};

/// Verify the environment the host launched this process with.
pub fn check_environment(handshake: &HandshakeConfig) -> Result<(), PluginError> {
    let cookie = env::var(&handshake.magic_cookie_key).unwrap_or_default();
    if cookie != handshake.magic_cookie_value {
        return Err(PluginError::Handshake(
            "This binary is a plugin. These are not meant to be executed directly. \
             Please execute the program that consumes these plugins, which will \
             load any plugins automatically"
                .to_string(),
        ));
    }

    if let Ok(version) = env::var(PROTOCOL_VERSION_ENV) {
        let version: u32 = version.trim().parse().map_err(|_| {
            PluginError::Handshake(format!("invalid {} value '{}'", PROTOCOL_VERSION_ENV, version))
        })?;
        if version != handshake.protocol_version {
            return Err(PluginError::Handshake(format!(
                "host speaks protocol version {}, plugin speaks {}",
                version, handshake.protocol_version
            )));
        }
    }
    Ok(())
}

/// Run `plugin` on this process's stdin and stdout.
///
/// Returns a handshake error without writing anything to stdout when the
/// process was not launched by a compatible host; plugin binaries should print
/// it to stderr and exit with status 1.
pub async fn serve<P: NodePlugin>(plugin: P, handshake: &HandshakeConfig) -> Result<(), PluginError> {
    check_environment(handshake)?;

    let mut stdout = tokio::io::stdout();
    let announcement = format!("{}\n", handshake.announcement());
    stdout
        .write_all(announcement.as_bytes())
        .await
        .map_err(|e| PluginError::Transport(e.to_string()))?;
    stdout
        .flush()
        .await
        .map_err(|e| PluginError::Transport(e.to_string()))?;

    log::info!("plugin {} serving", plugin.metadata().id);
    serve_io(&plugin, tokio::io::stdin(), stdout).await
}

/// Answer requests read from `reader` until EOF or a shutdown request.
pub async fn serve_io<P, R, W>(plugin: &P, reader: R, mut writer: W) -> Result<(), PluginError>
where
    P: NodePlugin + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(PluginError::Transport(e.to_string())),
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, stop) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let stop = request.method == Method::Shutdown;
                (dispatch(plugin, request).await, stop)
            }
            Err(e) => (Response::err(request_id(&line), format!("malformed request: {}", e)), false),
        };

        let mut encoded = serde_json::to_string(&response).map_err(|e| PluginError::Transport(e.to_string()))?;
        encoded.push('\n');
        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| PluginError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| PluginError::Transport(e.to_string()))?;

        if stop {
            log::debug!("shutdown requested");
            break;
        }
    }
    Ok(())
}

async fn dispatch<P: NodePlugin + ?Sized>(plugin: &P, request: Request) -> Response {
    let id = request.id;
    match request.method {
        Method::Execute => {
            let inputs = match request.params {
                Value::Object(map) => map,
                Value::Null => Default::default(),
                other => return Response::err(id, format!("execute params must be an object, got {}", other)),
            };
            match plugin.execute(inputs).await {
                Ok(outputs) => Response::ok(id, Value::Object(outputs)),
                Err(e) => Response::err(id, e.to_string()),
            }
        }
        Method::GetConfigSchema => Response::ok(id, plugin.config_schema()),
        Method::GetMetadata => match serde_json::to_value(plugin.metadata()) {
            Ok(metadata) => Response::ok(id, metadata),
            Err(e) => Response::err(id, e.to_string()),
        },
        Method::Shutdown => Response::ok(id, Value::Null),
    }
}

/// Best-effort id of a request that failed to parse.
fn request_id(line: &str) -> u64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}
