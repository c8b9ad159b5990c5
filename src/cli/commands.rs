//! Command dispatch and terminal output for the CLI.

use super::{Cli, Command, client::StoreClient};
use crate::models::{bucket::Bucket, object::ObjectMetadata};
use anyhow::{Context, Result, anyhow, bail};
use futures::StreamExt;
use reqwest::Response;
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::{self, AsyncWrite, AsyncWriteExt},
};
use uuid::Uuid;

const LISTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which way a `cp` moves bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum Transfer<'a> {
    Upload {
        local: &'a str,
        bucket: &'a str,
        key: &'a str,
    },
    Download {
        bucket: &'a str,
        key: &'a str,
        local: &'a str,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let client = StoreClient::new(&cli.server)?;

    match cli.command {
        Command::MakeBucket { bucket } => {
            tracing::info!("Creating bucket '{}'", bucket);
            client.create_bucket(&bucket).await?;
            println!("Bucket '{}' created successfully.", bucket);
        }
        Command::List { bucket: None } => {
            tracing::info!("Listing buckets");
            let buckets = client.list_buckets().await?;
            if buckets.is_empty() {
                println!("No buckets found.");
            } else {
                print!("{}", render_buckets(&buckets));
            }
        }
        Command::List {
            bucket: Some(bucket),
        } => {
            tracing::info!("Listing objects in bucket '{}'", bucket);
            let objects = client.list_objects(&bucket).await?;
            if objects.is_empty() {
                println!("No objects found in bucket '{}'.", bucket);
            } else {
                print!("{}", render_objects(&objects));
            }
        }
        Command::Copy {
            source,
            destination,
        } => match transfer_direction(&source, &destination)? {
            Transfer::Upload { local, bucket, key } => {
                tracing::info!("Uploading '{}' to '{}/{}'", local, bucket, key);
                let object = client.put_object(bucket, key, Path::new(local)).await?;
                println!(
                    "File uploaded successfully to '{}/{}' ({}).",
                    bucket,
                    key,
                    format_size(object.size)
                );
            }
            Transfer::Download { bucket, key, local } => {
                tracing::info!("Downloading '{}/{}' to '{}'", bucket, key, local);
                let written = download_to_file(&client, bucket, key, Path::new(local)).await?;
                println!(
                    "File downloaded successfully to '{}' ({}).",
                    local,
                    format_size(written)
                );
            }
        },
        Command::Remove { path } => {
            let (bucket, key) = parse_remote_path(&path)?;
            tracing::info!("Removing object '{}/{}'", bucket, key);
            client.delete_object(bucket, key).await?;
            println!("Object '{}/{}' removed successfully.", bucket, key);
        }
        Command::Cat { path } => {
            let (bucket, key) = parse_remote_path(&path)?;
            let resp = client.get_object(bucket, key).await?;
            copy_body(resp, &mut io::stdout()).await?;
        }
        Command::Stat { path } => {
            let (bucket, key) = parse_remote_path(&path)?;
            let stat = client.head_object(bucket, key).await?;
            println!("Object: {}/{}", bucket, key);
            println!("Content-Type: {}", stat.content_type);
            println!("Content-Length: {}", stat.content_length);
            println!("ETag: {}", stat.etag);
            println!("Last-Modified: {}", stat.last_modified);
        }
    }

    Ok(())
}

/// Stream a response body into `out`, returning the number of bytes written.
async fn copy_body<W>(resp: Response, out: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("reading response body")?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

/// Download an object into `local`.
///
/// The request must succeed before anything local is touched, and the body
/// lands in a hidden sibling that replaces `local` only once complete.
pub async fn download_to_file(
    client: &StoreClient,
    bucket: &str,
    key: &str,
    local: &Path,
) -> Result<u64> {
    let resp = client.get_object(bucket, key).await?;

    let partial = partial_path(local)?;
    let result = async {
        let mut file = File::create(&partial)
            .await
            .with_context(|| format!("creating local file {}", partial.display()))?;
        let written = copy_body(resp, &mut file).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&partial, local)
            .await
            .with_context(|| format!("moving download into {}", local.display()))?;
        Ok::<_, anyhow::Error>(written)
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&partial).await;
    }
    result
}

fn partial_path(local: &Path) -> Result<PathBuf> {
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("`{}` is not a file path", local.display()))?;
    Ok(local.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4())))
}

/// Split `bucket/key` at the first slash.
pub fn parse_remote_path(path: &str) -> Result<(&str, &str)> {
    match path.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => bail!("path must be in format: bucket/key (got `{}`)", path),
    }
}

/// The side written as `bucket/key` is remote; the other is a local file.
pub fn transfer_direction<'a>(source: &'a str, destination: &'a str) -> Result<Transfer<'a>> {
    match (source.contains('/'), destination.contains('/')) {
        (false, true) => {
            let (bucket, key) = parse_remote_path(destination)?;
            Ok(Transfer::Upload {
                local: source,
                bucket,
                key,
            })
        }
        (true, false) => {
            let (bucket, key) = parse_remote_path(source)?;
            Ok(Transfer::Download {
                bucket,
                key,
                local: destination,
            })
        }
        _ => bail!("invalid copy operation. Use: <local-file> <bucket/key> or <bucket/key> <local-file>"),
    }
}

pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match size {
        s if s >= GB => format!("{:.1}GB", s as f64 / GB as f64),
        s if s >= MB => format!("{:.1}MB", s as f64 / MB as f64),
        s if s >= KB => format!("{:.1}KB", s as f64 / KB as f64),
        s => format!("{}B", s),
    }
}

pub fn render_buckets(buckets: &[Bucket]) -> String {
    let rows = buckets
        .iter()
        .map(|b| vec![b.name.clone(), b.created.format(LISTING_TIME_FORMAT).to_string()])
        .collect();
    render_table(&["BUCKET NAME", "CREATED"], rows)
}

pub fn render_objects(objects: &[ObjectMetadata]) -> String {
    let rows = objects
        .iter()
        .map(|o| {
            vec![
                o.key.clone(),
                format_size(o.size),
                o.content_type.clone(),
                o.last_modified.format(LISTING_TIME_FORMAT).to_string(),
            ]
        })
        .collect();
    render_table(&["OBJECT KEY", "SIZE", "CONTENT TYPE", "LAST MODIFIED"], rows)
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
fn render_table(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let rule: Vec<String> = header.iter().map(|h| "-".repeat(h.len())).collect();
    let mut lines: Vec<Vec<String>> = vec![header.iter().map(|h| h.to_string()).collect(), rule];
    lines.extend(rows);

    let mut widths = vec![0; header.len()];
    for line in &lines {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for line in &lines {
        let last = line.len().saturating_sub(1);
        for (i, cell) in line.iter().enumerate() {
            if i == last {
                out.push_str(cell);
            } else {
                out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
            }
        }
        out.push('\n');
    }
    out
}
