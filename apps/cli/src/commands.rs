//! CLI command implementations

use crate::output::{format_bytes, print_output, status_icon, truncate};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, bail, Result};
use console::style;
use mediadl_core::{DownloadRecord, MediaDlCore};
use mediadl_types::{DownloadStatus, MediaItem, Settings};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use url::form_urlencoded;

// ============================================================================
// Download Commands
// ============================================================================

/// Arguments of `mediadl add`
pub struct AddRequest {
    pub server_url: String,
    pub api_key: String,
    pub item: Option<PathBuf>,
    pub item_id: Option<String>,
    pub server_id: Option<String>,
    pub name: Option<String>,
    pub filename: Option<String>,
    pub download_url: Option<String>,
}

async fn load_item(request: &AddRequest) -> Result<MediaItem> {
    let item = match (&request.item, &request.item_id, &request.server_id) {
        (Some(path), _, _) => {
            let content = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<MediaItem>(&content)?
        }
        (None, Some(id), Some(server_id)) => MediaItem {
            name: request.name.clone(),
            ..MediaItem::new(id.clone(), server_id.clone())
        },
        _ => bail!("Either --item or --item-id with --server-id is required"),
    };

    if item.id.is_empty() || item.server_id.is_empty() {
        bail!("The item needs both an Id and a ServerId");
    }
    Ok(item)
}

pub async fn add_download(
    core: &MediaDlCore,
    request: AddRequest,
    format: OutputFormat,
) -> Result<()> {
    let item = load_item(&request).await?;

    let filename = request.filename.clone().unwrap_or_else(|| {
        item.path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.id.clone())
    });
    let download_url = request
        .download_url
        .clone()
        .unwrap_or_else(|| default_download_url(&item.id, &request.api_key));

    let record = DownloadRecord::new(
        item,
        request.server_url,
        request.api_key,
        filename,
        download_url,
    );
    let record = core.add_download(record).await?;

    print_output(&record, format, |record| {
        println!(
            "{} Added download: {}",
            style("✓").green().bold(),
            style(record.title().unwrap_or(&record.filename)).cyan()
        );
        println!("  Key: {}", record.key());
    })
}

/// Original-file endpoint of an item, relative to the server URL
fn default_download_url(item_id: &str, api_key: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("api_key", api_key)
        .finish();
    format!("Items/{}/Download?{}", item_id, query)
}

pub async fn list_downloads(
    core: &MediaDlCore,
    status_filter: Option<String>,
    show_all: bool,
    format: OutputFormat,
) -> Result<()> {
    let downloads = core.get_all_downloads().await?;

    let filtered: Vec<_> = downloads
        .into_iter()
        .filter(|d| match status_filter {
            Some(ref status) => d.status.as_str().contains(&status.to_lowercase()),
            None => true,
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&filtered)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct DownloadRow {
                key: String,
                title: String,
                subtitle: String,
                status: String,
                new: String,
            }

            let rows: Vec<DownloadRow> = filtered
                .iter()
                .map(|d| DownloadRow {
                    key: d.key(),
                    title: truncate(d.title().unwrap_or(&d.filename), 30),
                    subtitle: d.subtitle().unwrap_or_default(),
                    status: d.status.to_string(),
                    new: if d.is_new { "•" } else { "" }.to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if filtered.is_empty() {
                println!("{}", style("No downloads found").dim());
                return Ok(());
            }

            let root = core.get_settings().await.download_root;
            for download in &filtered {
                print_download_summary(download, &root, show_all);
            }
            println!();
            println!("{} download(s) total", style(filtered.len()).bold());

            let totals: Vec<String> = core
                .status_counts()
                .await?
                .into_iter()
                .map(|(status, count)| format!("{} {}", count, status))
                .collect();
            println!("{}", style(totals.join(", ")).dim());
        }
    }

    // Downloads that were listed complete are no longer new
    core.refresh_new_flags().await?;
    Ok(())
}

fn print_download_summary(download: &DownloadRecord, root: &Path, detailed: bool) {
    let title = download.title().unwrap_or(&download.filename);
    let new_badge = if download.is_new && download.is_complete() {
        style(" new").cyan().to_string()
    } else {
        String::new()
    };

    println!(
        "{} {}{} [{}]",
        status_icon(download.status),
        style(title).bold(),
        new_badge,
        style(download.status).dim()
    );
    if let Some(subtitle) = download.subtitle() {
        println!("    {}", style(subtitle).dim());
    }

    if detailed {
        println!("    Key: {}", download.key());
        println!("    File: {}", download.local_file(root).display());
        println!("    Server: {}", download.server_url());
        if let Some(ref extension) = download.extension {
            println!("    Extension: {}", extension);
        }
        println!("    Added: {}", download.created_at.format("%Y-%m-%d %H:%M"));
        println!();
    }
}

pub async fn show_info(core: &MediaDlCore, key: &str, format: OutputFormat) -> Result<()> {
    let download = core.get_download(key).await?;
    let root = core.get_settings().await.download_root;

    print_output(&download, format, |download| {
        print_download_summary(download, &root, true);
    })?;

    if let OutputFormat::Json = format {
        return Ok(());
    }

    if let Ok(metadata) = tokio::fs::metadata(download.local_file(&root)).await {
        println!("    Size on disk: {}", format_bytes(metadata.len()));
    }
    let actions: Vec<_> = download
        .available_actions()
        .iter()
        .filter(|a| a.is_supported)
        .map(|a| format!("{:?}", a.id))
        .collect();
    println!("    Actions: {}", actions.join(", "));
    Ok(())
}

pub async fn run_downloads(core: &MediaDlCore, format: OutputFormat) -> Result<()> {
    let downloads = core.get_all_downloads().await?;
    let pending = downloads
        .iter()
        .filter(|d| d.status == DownloadStatus::Pending)
        .count();

    if pending == 0 {
        println!("{}", style("Nothing to download").dim());
        return Ok(());
    }

    let mut progress = DownloadProgress::new();
    for download in &downloads {
        if let Some(title) = download.title() {
            progress.set_title(&download.key(), title);
        }
    }

    let mut events = core.subscribe();
    let _ = core.enable();

    let idle = core.wait_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            result = &mut idle => {
                result?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    core.disable();

    while let Ok(event) = events.try_recv() {
        progress.handle_event(&event);
    }
    progress.clear();

    let downloads = core.get_all_downloads().await?;
    let complete = downloads.iter().filter(|d| d.is_complete()).count();
    let failed = downloads
        .iter()
        .filter(|d| d.status == DownloadStatus::Failed)
        .count();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&downloads)?),
        _ => println!(
            "{} complete, {} failed",
            style(complete).green().bold(),
            style(failed).red().bold()
        ),
    }
    Ok(())
}

pub async fn check_downloads(
    core: &MediaDlCore,
    key: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let keys = match key {
        Some(key) => vec![key],
        None => core
            .get_all_downloads()
            .await?
            .iter()
            .filter(|d| matches!(d.status, DownloadStatus::Complete | DownloadStatus::Missing))
            .map(DownloadRecord::key)
            .collect(),
    };

    let mut checked = Vec::with_capacity(keys.len());
    for key in keys {
        checked.push(core.check_download(&key).await?);
    }

    print_output(&checked, format, |checked| {
        for download in checked {
            println!(
                "{} {} [{}]",
                status_icon(download.status),
                download.title().unwrap_or(&download.filename),
                style(download.status).dim()
            );
        }
    })
}

pub async fn play_download(core: &MediaDlCore, key: &str, format: OutputFormat) -> Result<()> {
    let download = core.get_download(key).await?;
    if !download.can_play_in_app() {
        println!(
            "{} This download can only be opened in another app",
            style("!").yellow().bold()
        );
    }

    let uri = core.open_download(key).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "uri": uri.as_str() })),
        _ => println!("{}", uri),
    }
    Ok(())
}

pub async fn delete_download(core: &MediaDlCore, key: &str, yes: bool) -> Result<()> {
    let download = core.get_download(key).await?;

    if !yes {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete \"{}\" and its file?",
                download.title().unwrap_or(&download.filename)
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            return Ok(());
        }
    }

    core.delete_download(key).await?;
    println!("{} Download deleted", style("✓").green().bold());
    Ok(())
}

pub async fn requeue_download(core: &MediaDlCore, key: &str) -> Result<()> {
    core.requeue_download(key).await?;
    println!("{} Download queued again", style("✓").green().bold());
    Ok(())
}

// ============================================================================
// Data Commands
// ============================================================================

pub async fn import_legacy(core: &MediaDlCore, file: PathBuf) -> Result<()> {
    let content = tokio::fs::read_to_string(&file).await?;
    let imported = core.import_legacy(&content).await?;
    println!(
        "{} Imported {} download(s) from {}",
        style("✓").green().bold(),
        imported,
        file.display()
    );
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    core: &MediaDlCore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = core.get_settings().await;

            print_output(&settings, format, |settings| {
                println!("mediadl Configuration:");
                println!();
                println!("  Data directory: {}", core.storage().data_dir().display());
                println!("  Download root: {}", settings.download_root.display());
                println!("  Device: {} ({})", settings.device_name, settings.device_id);
                println!(
                    "  Client: {} {}",
                    settings.client_name, settings.client_version
                );
                println!(
                    "  Transcoded downloads: {}",
                    settings.experimental_transcoded_downloads
                );
            })?;
        }

        Some(ConfigAction::Get { key }) => {
            let settings = core.get_settings().await;
            let value = match key.as_str() {
                "download_root" => settings.download_root.display().to_string(),
                "device_id" => settings.device_id,
                "device_name" => settings.device_name,
                "client_name" => settings.client_name,
                "client_version" => settings.client_version,
                "experimental_transcoded_downloads" => {
                    settings.experimental_transcoded_downloads.to_string()
                }
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            };
            println!("{}", value);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = core.get_settings().await;

            match key.as_str() {
                "download_root" => settings.download_root = PathBuf::from(value),
                "device_name" => settings.device_name = value,
                "experimental_transcoded_downloads" => {
                    settings.experimental_transcoded_downloads = value.parse()?
                }
                _ => return Err(anyhow!("Unknown or read-only config key: {}", key)),
            }

            core.update_settings(settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Profile) => {
            println!("{}", serde_json::to_string_pretty(core.download_profile())?);
        }

        Some(ConfigAction::ImportProfile { file }) => {
            let content = tokio::fs::read_to_string(&file).await?;
            let profile = core.import_device_profile(&content).await?;
            println!(
                "{} Device profile {} saved",
                style("✓").green().bold(),
                style(profile.name.as_deref().unwrap_or("(unnamed)")).cyan()
            );
        }

        Some(ConfigAction::Reset) => {
            use dialoguer::Confirm;

            let confirmed = Confirm::new()
                .with_prompt("Reset all settings to defaults?")
                .default(false)
                .interact()?;

            if confirmed {
                let device_id = core.get_settings().await.device_id;
                core.update_settings(Settings {
                    device_id,
                    ..Settings::default()
                })
                .await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}
