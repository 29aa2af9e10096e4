use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tokio::io::AsyncWriteExt;

use crate::cli::BuildArgs;
use crate::storage::{StoragePaths, file_present_nonempty};

const GEONAMES_US_ZIP_URL: &str = "https://download.geonames.org/export/zip/US.zip";

/// Make sure the GeoNames ZIP-centroid file is available locally, downloading
/// and extracting it when permitted. The charge CSVs are supplied by the
/// caller and are never fetched here.
pub async fn ensure_zip_centroids(
    paths: &StoragePaths,
    opts: &BuildArgs,
) -> anyhow::Result<PathBuf> {
    if let Some(p) = opts.zip_centroids_file.as_ref() {
        return Ok(PathBuf::from(p));
    }

    let out_txt = paths.geonames_us_txt();
    if !opts.force_download && file_present_nonempty(&out_txt) {
        return Ok(out_txt);
    }

    if opts.offline {
        return Err(anyhow!(
            "Missing ZIP centroid file at {} (use --zip-centroids-file or run without --offline).",
            out_txt.display()
        ));
    }

    let zip_path = paths.geonames_us_zip();
    ensure_download(GEONAMES_US_ZIP_URL, &zip_path, opts.force_download).await?;
    extract_first_txt_from_zip(&zip_path, &out_txt).context("extract US.zip")?;
    Ok(out_txt)
}

async fn ensure_download(url: &str, dest: &Path, force: bool) -> anyhow::Result<()> {
    if !force && file_present_nonempty(dest) {
        return Ok(());
    }

    let tmp = tmp_path(dest);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    tracing::info!("Downloading {} -> {}", url, dest.display());

    let client = reqwest::Client::new();
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;

    if !resp.status().is_success() {
        return Err(anyhow!("Download failed ({}): {}", resp.status(), url));
    }

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;

    let mut downloaded: u64 = 0;
    let mut stream = resp.bytes_stream();
    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("read body chunk from {url}"))?;
        downloaded += chunk.len() as u64;
        file.write_all(&chunk).await?;

        if downloaded % (50 * 1024 * 1024) < chunk.len() as u64 {
            tracing::info!("... downloaded {} MB", downloaded / (1024 * 1024));
        }
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;

    Ok(())
}

fn tmp_path(dest: &Path) -> PathBuf {
    let fname = dest
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    dest.with_file_name(format!("{fname}.part"))
}

fn extract_first_txt_from_zip(zip_path: &Path, out_txt: &Path) -> anyhow::Result<()> {
    use std::io::{Read, Write};

    let f =
        std::fs::File::open(zip_path).with_context(|| format!("open {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(f).context("read zip archive")?;

    let mut chosen_index: Option<usize> = None;
    for i in 0..archive.len() {
        let name = archive.by_index(i)?.name().to_string();
        if name.ends_with("US.txt") {
            chosen_index = Some(i);
            break;
        }
        if chosen_index.is_none() && name.ends_with(".txt") {
            chosen_index = Some(i);
        }
    }
    let idx =
        chosen_index.ok_or_else(|| anyhow!("no .txt file found in {}", zip_path.display()))?;

    let mut zf = archive.by_index(idx)?;
    let mut buf = Vec::new();
    zf.read_to_end(&mut buf)?;

    if let Some(parent) = out_txt.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::fs::File::create(out_txt)?;
    out.write_all(&buf)?;
    out.flush()?;

    Ok(())
}
