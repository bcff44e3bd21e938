use crate::errors::AppError;
use crate::events::Event;
use crate::models::AppData;
use crate::state::AppState;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, warn};

/// Reads the store. A missing file is a fresh install; an unreadable one is
/// logged and replaced by an empty store on the next write.
pub async fn load_data(path: &Path) -> AppData {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no data file yet, starting empty");
            return AppData::default();
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to read data file");
            return AppData::default();
        }
    };

    serde_json::from_slice(&bytes).unwrap_or_else(|err| {
        error!(path = %path.display(), error = %err, "failed to parse data file");
        AppData::default()
    })
}

pub async fn persist_data(path: &Path, data: &AppData) -> Result<(), AppError> {
    let payload = serde_json::to_vec_pretty(data).map_err(AppError::internal)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, payload).await.map_err(AppError::internal)?;
    Ok(())
}

/// Appends events and persists them off the request path.
///
/// Failures are logged and dropped; analytics never fail a request.
pub fn dispatch_events(state: &AppState, events: Vec<Event>) {
    if events.is_empty() {
        return;
    }

    let state = state.clone();
    tokio::spawn(async move {
        let mut data = state.data.lock().await;
        data.events.extend(events);
        if let Err(err) = persist_data(&state.config.data_path, &data).await {
            warn!(error = %err.message, "failed to persist analytics events");
        }
    });
}
