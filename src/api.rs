//! The aria2 method catalog.
//!
//! [`RpcCaller`] is the seam between transports and methods: anything that
//! can send one call and return its result. [`Aria2`] adds the typed aria2
//! methods on top and is implemented for every `RpcCaller`, so the same
//! wrappers work over the duplex WebSocket client and the one-shot HTTP
//! client.
//!
//! Results with a fixed documented shape are decoded into structs; the rest
//! stay as `serde_json::Value`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, RpcError};
use crate::protocol::RemoteError;
use crate::request::MULTICALL_METHOD;

/// Per-download or global option map (`{"max-download-limit": "1M", ...}`).
pub type Options = Map<String, Value>;

/// Sends one call and returns its `result`.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    /// Call `method` (fully qualified, e.g. `aria2.addUri`).
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

/// `aria2.getVersion` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// aria2 version string.
    pub version: String,
    /// Compiled-in features.
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

/// `aria2.getGlobalStat` result. aria2 reports every number as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStat {
    /// Overall download speed (bytes/sec).
    pub download_speed: String,
    /// Overall upload speed (bytes/sec).
    pub upload_speed: String,
    /// Number of active downloads.
    pub num_active: String,
    /// Number of waiting downloads.
    pub num_waiting: String,
    /// Number of stopped downloads in the current session.
    pub num_stopped: String,
    /// Number of stopped downloads, not capped by `--max-download-result`.
    #[serde(default)]
    pub num_stopped_total: Option<String>,
}

/// `aria2.getSessionInfo` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Id generated each time aria2 is invoked.
    pub session_id: String,
}

/// Queue position mode for `aria2.changePosition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionHow {
    /// Relative to the start of the queue.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to the end of the queue.
    End,
}

impl PositionHow {
    fn as_str(self) -> &'static str {
        match self {
            Self::Set => "POS_SET",
            Self::Cur => "POS_CUR",
            Self::End => "POS_END",
        }
    }
}

/// One inner call of `system.multicall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticallEntry {
    /// Fully qualified method name.
    #[serde(rename = "methodName")]
    pub method_name: String,
    /// Positional params (token is added by the request factory).
    pub params: Vec<Value>,
}

impl MulticallEntry {
    /// Create an entry.
    pub fn new(method_name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method_name: method_name.into(),
            params,
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn expect_ok(value: &Value) -> Result<()> {
    match value.as_str() {
        Some("OK") => Ok(()),
        _ => Err(RpcError::ProtocolDecode(format!("expected \"OK\", got {value}"))),
    }
}

fn with_options_and_position(
    mut params: Vec<Value>,
    options: Option<Options>,
    position: Option<u32>,
) -> Vec<Value> {
    if let Some(options) = options {
        params.push(Value::Object(options));
    }
    if let Some(position) = position {
        params.push(json!(position));
    }
    params
}

fn with_keys(mut params: Vec<Value>, keys: Option<&[&str]>) -> Vec<Value> {
    if let Some(keys) = keys {
        params.push(json!(keys));
    }
    params
}

/// Split a multicall result into per-entry outcomes.
///
/// Each element is either `[value]` or a fault object.
fn split_multicall(value: Value) -> Result<Vec<Result<Value>>> {
    let Value::Array(items) = value else {
        return Err(RpcError::ProtocolDecode(format!(
            "multicall result is not an array: {value}"
        )));
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::Array(mut single) if single.len() == 1 => Ok(single.remove(0)),
            other => Err(RpcError::Remote(RemoteError::from_value(other))),
        })
        .collect())
}

/// Typed aria2 methods, available on every [`RpcCaller`].
#[async_trait]
pub trait Aria2: RpcCaller {
    /// Add a download from HTTP/FTP/SFTP/BitTorrent URIs. Returns the GID.
    async fn add_uri(
        &self,
        uris: &[&str],
        options: Option<Options>,
        position: Option<u32>,
    ) -> Result<String> {
        let params = with_options_and_position(vec![json!(uris)], options, position);
        decode(self.call("aria2.addUri", params).await?)
    }

    /// Add a BitTorrent download from a base64-encoded `.torrent`.
    async fn add_torrent(
        &self,
        torrent_base64: &str,
        uris: Option<&[&str]>,
        options: Option<Options>,
        position: Option<u32>,
    ) -> Result<String> {
        let mut params = vec![json!(torrent_base64)];
        if let Some(uris) = uris {
            params.push(json!(uris));
        }
        let params = with_options_and_position(params, options, position);
        decode(self.call("aria2.addTorrent", params).await?)
    }

    /// Add a Metalink download from a base64-encoded `.metalink`.
    /// Returns the GIDs of the new downloads.
    async fn add_metalink(
        &self,
        metalink_base64: &str,
        options: Option<Options>,
        position: Option<u32>,
    ) -> Result<Vec<String>> {
        let params = with_options_and_position(vec![json!(metalink_base64)], options, position);
        decode(self.call("aria2.addMetalink", params).await?)
    }

    /// Remove a download (stops it first if active). Returns the GID.
    async fn remove(&self, gid: &str) -> Result<String> {
        decode(self.call("aria2.remove", vec![json!(gid)]).await?)
    }

    /// Remove without contacting trackers first.
    async fn force_remove(&self, gid: &str) -> Result<String> {
        decode(self.call("aria2.forceRemove", vec![json!(gid)]).await?)
    }

    /// Pause a download.
    async fn pause(&self, gid: &str) -> Result<String> {
        decode(self.call("aria2.pause", vec![json!(gid)]).await?)
    }

    /// Pause every active/waiting download.
    async fn pause_all(&self) -> Result<()> {
        expect_ok(&self.call("aria2.pauseAll", vec![]).await?)
    }

    /// Pause without contacting trackers first.
    async fn force_pause(&self, gid: &str) -> Result<String> {
        decode(self.call("aria2.forcePause", vec![json!(gid)]).await?)
    }

    /// `force_pause` for every active/waiting download.
    async fn force_pause_all(&self) -> Result<()> {
        expect_ok(&self.call("aria2.forcePauseAll", vec![]).await?)
    }

    /// Move a paused download back to waiting.
    async fn unpause(&self, gid: &str) -> Result<String> {
        decode(self.call("aria2.unpause", vec![json!(gid)]).await?)
    }

    /// Unpause every paused download.
    async fn unpause_all(&self) -> Result<()> {
        expect_ok(&self.call("aria2.unpauseAll", vec![]).await?)
    }

    /// Status of one download, optionally limited to `keys`.
    async fn tell_status(&self, gid: &str, keys: Option<&[&str]>) -> Result<Value> {
        self.call("aria2.tellStatus", with_keys(vec![json!(gid)], keys))
            .await
    }

    /// URIs used by a download.
    async fn get_uris(&self, gid: &str) -> Result<Value> {
        self.call("aria2.getUris", vec![json!(gid)]).await
    }

    /// Files of a download.
    async fn get_files(&self, gid: &str) -> Result<Value> {
        self.call("aria2.getFiles", vec![json!(gid)]).await
    }

    /// BitTorrent peers of a download.
    async fn get_peers(&self, gid: &str) -> Result<Value> {
        self.call("aria2.getPeers", vec![json!(gid)]).await
    }

    /// Currently connected HTTP(S)/FTP/SFTP servers of a download.
    async fn get_servers(&self, gid: &str) -> Result<Value> {
        self.call("aria2.getServers", vec![json!(gid)]).await
    }

    /// Active downloads.
    async fn tell_active(&self, keys: Option<&[&str]>) -> Result<Value> {
        self.call("aria2.tellActive", with_keys(vec![], keys)).await
    }

    /// Waiting (and paused) downloads, `num` entries from `offset`.
    async fn tell_waiting(&self, offset: i64, num: u32, keys: Option<&[&str]>) -> Result<Value> {
        self.call(
            "aria2.tellWaiting",
            with_keys(vec![json!(offset), json!(num)], keys),
        )
        .await
    }

    /// Stopped downloads, `num` entries from `offset`.
    async fn tell_stopped(&self, offset: i64, num: u32, keys: Option<&[&str]>) -> Result<Value> {
        self.call(
            "aria2.tellStopped",
            with_keys(vec![json!(offset), json!(num)], keys),
        )
        .await
    }

    /// Move a download in the queue. Returns the resulting position.
    async fn change_position(&self, gid: &str, pos: i64, how: PositionHow) -> Result<i64> {
        decode(
            self.call(
                "aria2.changePosition",
                vec![json!(gid), json!(pos), json!(how.as_str())],
            )
            .await?,
        )
    }

    /// Remove `del_uris` then add `add_uris` on file `file_index` (1-based).
    /// Returns `[removed, added]`.
    async fn change_uri(
        &self,
        gid: &str,
        file_index: u32,
        del_uris: &[&str],
        add_uris: &[&str],
        position: Option<u32>,
    ) -> Result<Vec<u64>> {
        let mut params = vec![json!(gid), json!(file_index), json!(del_uris), json!(add_uris)];
        if let Some(position) = position {
            params.push(json!(position));
        }
        decode(self.call("aria2.changeUri", params).await?)
    }

    /// Options of a download.
    async fn get_option(&self, gid: &str) -> Result<Options> {
        decode(self.call("aria2.getOption", vec![json!(gid)]).await?)
    }

    /// Change options of a download.
    async fn change_option(&self, gid: &str, options: Options) -> Result<()> {
        expect_ok(
            &self
                .call("aria2.changeOption", vec![json!(gid), Value::Object(options)])
                .await?,
        )
    }

    /// Global options.
    async fn get_global_option(&self) -> Result<Options> {
        decode(self.call("aria2.getGlobalOption", vec![]).await?)
    }

    /// Change global options.
    async fn change_global_option(&self, options: Options) -> Result<()> {
        expect_ok(
            &self
                .call("aria2.changeGlobalOption", vec![Value::Object(options)])
                .await?,
        )
    }

    /// Overall speeds and download counts.
    async fn get_global_stat(&self) -> Result<GlobalStat> {
        decode(self.call("aria2.getGlobalStat", vec![]).await?)
    }

    /// Drop completed/error/removed downloads from memory.
    async fn purge_download_result(&self) -> Result<()> {
        expect_ok(&self.call("aria2.purgeDownloadResult", vec![]).await?)
    }

    /// Drop one completed/error/removed download from memory.
    async fn remove_download_result(&self, gid: &str) -> Result<()> {
        expect_ok(
            &self
                .call("aria2.removeDownloadResult", vec![json!(gid)])
                .await?,
        )
    }

    /// aria2 version and enabled features.
    async fn get_version(&self) -> Result<Version> {
        decode(self.call("aria2.getVersion", vec![]).await?)
    }

    /// Session information.
    async fn get_session_info(&self) -> Result<SessionInfo> {
        decode(self.call("aria2.getSessionInfo", vec![]).await?)
    }

    /// Shut aria2 down.
    async fn shutdown(&self) -> Result<()> {
        expect_ok(&self.call("aria2.shutdown", vec![]).await?)
    }

    /// Shut aria2 down without contacting trackers.
    async fn force_shutdown(&self) -> Result<()> {
        expect_ok(&self.call("aria2.forceShutdown", vec![]).await?)
    }

    /// Save the session to the `--save-session` file.
    async fn save_session(&self) -> Result<()> {
        expect_ok(&self.call("aria2.saveSession", vec![]).await?)
    }

    /// Several calls in one request. One outcome per entry, in order.
    async fn multicall(&self, entries: Vec<MulticallEntry>) -> Result<Vec<Result<Value>>> {
        let entries = serde_json::to_value(entries)?;
        split_multicall(self.call(MULTICALL_METHOD, vec![entries]).await?)
    }

    /// Every RPC method the daemon offers.
    async fn list_methods(&self) -> Result<Vec<String>> {
        decode(self.call("system.listMethods", vec![]).await?)
    }

    /// Every notification the daemon may send.
    async fn list_notifications(&self) -> Result<Vec<String>> {
        decode(self.call("system.listNotifications", vec![]).await?)
    }
}

impl<T: RpcCaller + ?Sized> Aria2 for T {}
