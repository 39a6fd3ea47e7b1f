//! Handlers for the CLI subcommands.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::Path;

use crate::cache::{AssetCache, AssetRequest, AssetResponse, CacheStorage, ServeSource};
use crate::config::Config;
use crate::net::Fetcher;
use crate::Command;

pub async fn run<S: CacheStorage, F: Fetcher>(
  cache: &AssetCache<S, F>,
  config: &Config,
  command: Command,
) -> Result<()> {
  match command {
    Command::Install => install(cache, config).await,
    Command::Fetch {
      url,
      method,
      output,
      include,
    } => {
      let request = build_request(config, &url, &method)?;
      fetch(cache, &request, output.as_deref(), include).await
    }
    Command::List { cache: name } => {
      let name = name.unwrap_or_else(|| config.cache_name.clone());
      list(cache.storage(), &name)
    }
    Command::Caches => {
      let mut out = std::io::stdout().lock();
      for name in cache.storage().cache_names()? {
        writeln!(out, "{}", name)?;
      }
      Ok(())
    }
    Command::Delete { name } => {
      if cache.storage().delete(&name)? {
        println!("Deleted cache {}", name);
        Ok(())
      } else {
        Err(eyre!("No cache named {}", name))
      }
    }
  }
}

async fn install<S: CacheStorage, F: Fetcher>(
  cache: &AssetCache<S, F>,
  config: &Config,
) -> Result<()> {
  let assets = config.asset_urls()?;
  let report = cache.populate(&config.cache_name, &assets).await?;
  println!(
    "Cached {} assets ({} bytes) in {}",
    report.entries, report.bytes, report.cache_name
  );
  Ok(())
}

fn build_request(config: &Config, url: &str, method: &str) -> Result<AssetRequest> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
  let request = AssetRequest::resolve(&config.origin_url()?, url)?;
  Ok(AssetRequest::new(method, request.url))
}

async fn fetch<S: CacheStorage, F: Fetcher>(
  cache: &AssetCache<S, F>,
  request: &AssetRequest,
  output: Option<&Path>,
  include: bool,
) -> Result<()> {
  let served = cache.serve(request).await?;

  eprintln!("{}", describe(request, &served.response, &served.source));

  match output {
    Some(path) => {
      tokio::fs::write(path, &served.response.body)
        .await
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      if include {
        write_head(&mut std::io::stdout().lock(), &served.response)?;
      }
    }
    None => {
      let mut out = std::io::stdout().lock();
      if include {
        write_head(&mut out, &served.response)?;
        writeln!(out)?;
      }
      out.write_all(&served.response.body)?;
      out.flush()?;
    }
  }

  Ok(())
}

/// One-line summary of a served response for stderr.
fn describe(request: &AssetRequest, response: &AssetResponse, source: &ServeSource) -> String {
  let content_type = response
    .header("content-type")
    .map(String::from_utf8_lossy)
    .unwrap_or_else(|| "unknown type".into());
  let origin = match source {
    ServeSource::Cache { cache_name } => format!("from cache {}", cache_name),
    ServeSource::Network => "from network".to_string(),
  };
  format!(
    "{} {} {} ({})",
    response.status, request.url, content_type, origin
  )
}

/// Header values are written as raw bytes, exactly as stored.
fn write_head(out: &mut impl Write, response: &AssetResponse) -> Result<()> {
  writeln!(out, "status: {}", response.status)?;
  for (name, value) in &response.headers {
    write!(out, "{}: ", name)?;
    out.write_all(value)?;
    writeln!(out)?;
  }
  Ok(())
}

fn list<S: CacheStorage>(storage: &S, name: &str) -> Result<()> {
  let entries = storage.entries(name)?;
  let mut out = std::io::stdout().lock();
  for entry in entries {
    writeln!(
      out,
      "{}  {:>10}  {}  {}  {}",
      entry.status,
      entry.size,
      &entry.digest[..12.min(entry.digest.len())],
      entry.stored_at.format("%Y-%m-%d %H:%M:%S"),
      entry.key
    )?;
  }
  Ok(())
}
