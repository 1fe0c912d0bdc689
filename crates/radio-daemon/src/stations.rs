use radio_core::config::Config;
use radio_core::station::{load_stations_from_m3u, load_stations_from_toml, parse_m3u_from_str};
use radio_core::Station;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Resolve the station list.  Sources, first hit wins:
///   1. `stations.toml` from the config
///   2. `stations.toml` beside the executable
///   3. `stations.toml` in the working directory
///   4. the configured m3u URL or file
///
/// An empty list is not an error; play commands report it.
pub async fn load_stations(config: &Config) -> Vec<Station> {
    let mut candidates = vec![config.stations.stations_toml.clone()];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("stations.toml"));
        }
    }
    candidates.push(PathBuf::from("stations.toml"));

    for path in &candidates {
        if let Some(stations) = try_toml(path) {
            return stations;
        }
    }

    let source = config.stations.m3u_url.trim();
    if !source.is_empty() {
        info!("Loading stations from m3u: {}", source);
        if source.starts_with("http://") || source.starts_with("https://") {
            match fetch_m3u_url(source).await {
                Ok(s) => {
                    info!("Loaded {} stations from URL", s.len());
                    return s;
                }
                Err(e) => warn!("Failed to fetch stations from URL: {}", e),
            }
        } else {
            let path = PathBuf::from(source);
            if path.exists() {
                match load_stations_from_m3u(&path) {
                    Ok(s) => {
                        info!("Loaded {} stations from m3u file", s.len());
                        return s;
                    }
                    Err(e) => warn!("Failed to read m3u file: {}", e),
                }
            }
        }
    }

    info!("No station source available, starting with empty list");
    Vec::new()
}

fn try_toml(path: &Path) -> Option<Vec<Station>> {
    if !path.exists() {
        return None;
    }
    match load_stations_from_toml(path) {
        Ok(s) => {
            info!("Loaded {} stations from TOML: {}", s.len(), path.display());
            Some(s)
        }
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

async fn fetch_m3u_url(url: &str) -> anyhow::Result<Vec<Station>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_m3u_from_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_toml_wins() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("stations.toml");
        std::fs::write(
            &toml_path,
            "[[station]]\nid = \"fip\"\nname = \"FIP\"\nurl = \"http://fip.example/stream\"\n",
        )
        .unwrap();
        let m3u_path = dir.path().join("radios.m3u");
        std::fs::write(&m3u_path, "#EXTM3U\n#EXTINF:-1,Other\nhttp://other.example\n").unwrap();

        let mut config = Config::default();
        config.stations.stations_toml = toml_path;
        config.stations.m3u_url = m3u_path.display().to_string();

        let stations = load_stations(&config).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].id, "fip");
    }

    #[tokio::test]
    async fn test_m3u_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let m3u_path = dir.path().join("radios.m3u");
        std::fs::write(&m3u_path, "#EXTM3U\n#EXTINF:-1,Other\nhttp://other.example\n").unwrap();

        let mut config = Config::default();
        config.stations.stations_toml = dir.path().join("missing.toml");
        config.stations.m3u_url = m3u_path.display().to_string();

        let stations = load_stations(&config).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].name, "Other");
    }
}
