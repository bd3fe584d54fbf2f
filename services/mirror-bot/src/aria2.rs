//! aria2 JSON-RPC adapter and lifecycle event source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::filename::find_file_path;
use mirror_core::ports::DownloadDaemon;
use mirror_core::{DaemonError, DaemonEvent, DaemonFile, DaemonState, DaemonStatus, EventKind, Gid};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATUS_KEYS: [&str; 5] = ["status", "totalLength", "completedLength", "downloadSpeed", "files"];
const POLL_KEYS: [&str; 2] = ["gid", "status"];
const POLL_PAGE: u64 = 1000;

pub struct Aria2Client {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    download_root: PathBuf,
    next_id: AtomicU64,
}

impl Aria2Client {
    pub fn new(url: &str, secret: Option<String>, download_root: PathBuf) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            secret,
            download_root,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, DaemonError> {
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all.push(json!(format!("token:{secret}")));
        }
        all.extend(params);

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            "method": format!("aria2.{method}"),
            "params": all,
        });
        // aria2 answers RPC errors with a 4xx and a JSON body, so no error_for_status here.
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DaemonError::Connection(e.to_string()))?;
        let json: Value = resp.json().await.map_err(|e| DaemonError::Connection(e.to_string()))?;
        parse_response(json)
    }

    async fn tell_status(&self, gid: &Gid, keys: &[&str]) -> Result<Value, DaemonError> {
        self.call("tellStatus", vec![json!(gid.as_str()), json!(keys)])
            .await
            .map_err(|e| not_found_as_unknown(e, gid))
    }

    pub async fn get_version(&self) -> Result<String, DaemonError> {
        let v = self.call("getVersion", vec![]).await?;
        Ok(v["version"].as_str().unwrap_or("unknown").to_string())
    }

    /// Id and state of every job aria2 currently knows about.
    async fn snapshot(&self) -> Result<Vec<(Gid, DaemonState)>, DaemonError> {
        let mut out = Vec::new();
        let lists = [
            self.call("tellActive", vec![json!(POLL_KEYS)]).await?,
            self.call("tellWaiting", vec![json!(0), json!(POLL_PAGE), json!(POLL_KEYS)]).await?,
            self.call("tellStopped", vec![json!(0), json!(POLL_PAGE), json!(POLL_KEYS)]).await?,
        ];
        for list in lists {
            for item in list.as_array().into_iter().flatten() {
                let (Some(gid), Some(state)) = (item["gid"].as_str(), item["status"].as_str().and_then(parse_state))
                else {
                    continue;
                };
                out.push((Gid::from(gid), state));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DownloadDaemon for Aria2Client {
    async fn submit(&self, uri: &str, dir: &Path, gid: &Gid) -> Result<Gid, DaemonError> {
        let options = json!({ "dir": dir.to_string_lossy(), "gid": gid.as_str() });
        let v = self.call("addUri", vec![json!([uri]), options]).await?;
        v.as_str()
            .map(Gid::from)
            .ok_or_else(|| DaemonError::Rpc("addUri returned no gid".to_string()))
    }

    async fn remove(&self, gid: &Gid) -> Result<(), DaemonError> {
        self.call("remove", vec![json!(gid.as_str())])
            .await
            .map_err(|e| not_found_as_unknown(e, gid))?;
        Ok(())
    }

    async fn status(&self, gid: &Gid) -> Result<DaemonStatus, DaemonError> {
        parse_status(&self.tell_status(gid, &STATUS_KEYS).await?)
    }

    async fn file_path(&self, gid: &Gid) -> Result<Option<PathBuf>, DaemonError> {
        let v = self.tell_status(gid, &["files"]).await?;
        Ok(find_file_path(&parse_files(&v["files"]), &self.download_root).path)
    }

    async fn file_size(&self, gid: &Gid) -> Result<u64, DaemonError> {
        let v = self.tell_status(gid, &["totalLength"]).await?;
        Ok(number(&v["totalLength"]))
    }

    async fn metadata_follow_up(&self, gid: &Gid) -> Result<Option<Gid>, DaemonError> {
        let v = self.tell_status(gid, &["followedBy"]).await?;
        Ok(v["followedBy"].get(0).and_then(Value::as_str).map(Gid::from))
    }

    async fn error_message(&self, gid: &Gid) -> Result<Option<String>, DaemonError> {
        let v = self.tell_status(gid, &["errorMessage"]).await?;
        Ok(v["errorMessage"].as_str().map(str::to_string))
    }
}

fn parse_response(v: Value) -> Result<Value, DaemonError> {
    if let Some(err) = v.get("error") {
        let message = err["message"].as_str().unwrap_or("unknown aria2 error");
        return Err(DaemonError::Rpc(message.to_string()));
    }
    v.get("result")
        .cloned()
        .ok_or_else(|| DaemonError::Rpc("aria2 response carried no result".to_string()))
}

fn not_found_as_unknown(e: DaemonError, gid: &Gid) -> DaemonError {
    match e {
        DaemonError::Rpc(m) if m.contains("is not found") => DaemonError::UnknownGid(gid.clone()),
        other => other,
    }
}

fn parse_state(s: &str) -> Option<DaemonState> {
    Some(match s {
        "active" => DaemonState::Active,
        "waiting" => DaemonState::Waiting,
        "paused" => DaemonState::Paused,
        "error" => DaemonState::Error,
        "complete" => DaemonState::Complete,
        "removed" => DaemonState::Removed,
        _ => return None,
    })
}

/// aria2 reports every counter as a decimal string.
fn number(v: &Value) -> u64 {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()).unwrap_or(0)
}

fn parse_files(v: &Value) -> Vec<DaemonFile> {
    v.as_array()
        .into_iter()
        .flatten()
        .map(|f| DaemonFile {
            path: f["path"].as_str().unwrap_or_default().to_string(),
            uris: f["uris"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|u| u["uri"].as_str().map(str::to_string))
                .collect(),
        })
        .collect()
}

fn parse_status(v: &Value) -> Result<DaemonStatus, DaemonError> {
    let raw = v["status"].as_str().unwrap_or_default();
    let state = parse_state(raw).ok_or_else(|| DaemonError::Rpc(format!("unexpected download status: {raw:?}")))?;
    Ok(DaemonStatus {
        state,
        total_bytes: number(&v["totalLength"]),
        completed_bytes: number(&v["completedLength"]),
        speed: number(&v["downloadSpeed"]),
        files: parse_files(&v["files"]),
    })
}

/// Lifecycle events implied by moving from `seen` to `now`.
fn transitions(seen: &HashMap<Gid, DaemonState>, now: &[(Gid, DaemonState)]) -> Vec<DaemonEvent> {
    let mut events = Vec::new();
    for (gid, state) in now {
        let before = seen.get(gid);
        if before == Some(state) {
            continue;
        }
        let kind = match state {
            DaemonState::Active => EventKind::Start,
            DaemonState::Complete => EventKind::Complete,
            DaemonState::Error => EventKind::Error,
            DaemonState::Removed => EventKind::Stop,
            DaemonState::Waiting | DaemonState::Paused => continue,
        };
        events.push(DaemonEvent { kind, gid: gid.clone() });
    }
    events
}

/// Polls aria2 and forwards state transitions as lifecycle events. Jobs that
/// already existed on the first poll only seed the baseline.
pub async fn run_event_poller(
    client: Arc<Aria2Client>,
    events: mpsc::Sender<DaemonEvent>,
    every: Duration,
    cancel: CancellationToken,
) {
    info!(every_ms = every.as_millis() as u64, "aria2 poller: started");
    let mut seen: Option<HashMap<Gid, DaemonState>> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }

        let now = match client.snapshot().await {
            Ok(now) => now,
            Err(e) => {
                warn!("aria2 poller: snapshot failed: {e}");
                continue;
            }
        };
        if let Some(prev) = &seen {
            for event in transitions(prev, &now) {
                debug!(gid=%event.gid, kind=?event.kind, "aria2 poller: transition");
                if events.send(event).await.is_err() {
                    info!("aria2 poller: event receiver gone");
                    return;
                }
            }
        }
        seen = Some(now.into_iter().collect());
    }
    info!("aria2 poller: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_maps_to_unknown_gid() {
        let e = parse_response(json!({"id":"1","jsonrpc":"2.0","error":{"code":1,"message":"GID 2089b05ecca3d829 is not found"}}))
            .unwrap_err();
        let gid = Gid::from("2089b05ecca3d829");
        assert!(matches!(not_found_as_unknown(e, &gid), DaemonError::UnknownGid(g) if g == gid));
    }

    #[test]
    fn status_parses_string_counters() {
        let v = json!({
            "status": "active",
            "totalLength": "2048",
            "completedLength": "1024",
            "downloadSpeed": "512",
            "files": [{"path": "/dl/x/a.iso", "uris": [{"uri": "http://h/a.iso", "status": "used"}]}]
        });
        let s = parse_status(&v).unwrap();
        assert_eq!(s.state, DaemonState::Active);
        assert_eq!((s.total_bytes, s.completed_bytes, s.speed), (2048, 1024, 512));
        assert_eq!(s.files[0].uris, vec!["http://h/a.iso"]);
    }

    #[test]
    fn transitions_emit_on_change_only() {
        let g = Gid::from("a");
        let mut seen = HashMap::new();
        seen.insert(g.clone(), DaemonState::Waiting);

        let events = transitions(&seen, &[(g.clone(), DaemonState::Active)]);
        assert_eq!(events, vec![DaemonEvent { kind: EventKind::Start, gid: g.clone() }]);

        seen.insert(g.clone(), DaemonState::Active);
        assert!(transitions(&seen, &[(g.clone(), DaemonState::Active)]).is_empty());

        let done = transitions(&seen, &[(g.clone(), DaemonState::Complete), (Gid::from("b"), DaemonState::Removed)]);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].kind, EventKind::Complete);
        assert_eq!(done[1].kind, EventKind::Stop);
    }
}
