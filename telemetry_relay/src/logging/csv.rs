// src/logging/csv.rs
//! Append-only audit trail. Best effort: failures never reach the protocol,
//! and every call is a no-op until `init` has run.
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::warn;

type Sink = Arc<Mutex<BufWriter<tokio::fs::File>>>;

static DIR: once_cell::sync::OnceCell<PathBuf> = once_cell::sync::OnceCell::new();

static ACCESS:      OnceCell<Sink> = OnceCell::const_new();
static SUBMISSIONS: OnceCell<Sink> = OnceCell::const_new();
static DELIVERIES:  OnceCell<Sink> = OnceCell::const_new();

/// Enable the audit trail under `dir`. Later calls are ignored.
pub fn init(dir: &Path) {
    let _ = DIR.set(dir.to_path_buf());
}

async fn get_file(cell: &OnceCell<Sink>, name: &str, header: &str) -> Option<Sink> {
    let dir = DIR.get()?;
    let path = dir.join(name);
    let res = cell
        .get_or_try_init(|| async move {
            fs::create_dir_all(dir).await?;
            let fresh = !fs::try_exists(&path).await.unwrap_or(false);
            let f = OpenOptions::new().create(true).append(true).open(&path).await?;
            let mut writer = BufWriter::new(f);
            if fresh {
                writer.write_all(header.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(Arc::new(Mutex::new(writer)))
        })
        .await;
    match res {
        Ok(sink) => Some(sink.clone()),
        Err(e) => {
            warn!(?e, file = name, "audit log unavailable");
            None
        }
    }
}

async fn append(cell: &OnceCell<Sink>, name: &str, header: &str, line: String) {
    let Some(file) = get_file(cell, name, header).await else { return };
    let mut f = file.lock().await;
    let _ = f.write_all(line.as_bytes()).await;
    let _ = f.flush().await;
}

/// Quote a field when it carries a separator, quote or newline.
fn field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// access.csv: ts,station,peer,event,detail
pub async fn log_access(station: &str, peer: &str, event: &str, detail: &str) {
    let ts = Utc::now().to_rfc3339();
    let line = format!("{ts},{},{},{event},{}\n", field(station), field(peer), field(detail));
    append(&ACCESS, "access.csv", "ts,station,peer,event,detail\n", line).await;
}

/// submissions.csv: ts,station,type,mid,fingerprint,outcome
pub async fn log_submission(station: &str, type_tag: &str, mid: &str, fingerprint: &str, outcome: &str) {
    let ts = Utc::now().to_rfc3339();
    let line = format!(
        "{ts},{},{},{},{fingerprint},{}\n",
        field(station), field(type_tag), field(mid), field(outcome)
    );
    append(&SUBMISSIONS, "submissions.csv", "ts,station,type,mid,fingerprint,outcome\n", line).await;
}

/// deliveries.csv: ts,station,mid,command_id
pub async fn log_delivery(station: &str, mid: &str, command_id: &str) {
    let ts = Utc::now().to_rfc3339();
    let line = format!("{ts},{},{},{command_id}\n", field(station), field(mid));
    append(&DELIVERIES, "deliveries.csv", "ts,station,mid,command_id\n", line).await;
}
