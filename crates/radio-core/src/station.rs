use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONTENT_TYPE_MPEG: &str = "audio/mpeg";
pub const CONTENT_TYPE_HLS: &str = "application/vnd.apple.mpegurl";
pub const CONTENT_TYPE_UNSUPPORTED: &str = "unsupported";

/// A named radio stream source with one or more candidate stream URIs.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stream_uris: Vec<String>,
    /// Index of the selected entry in `stream_uris`.
    #[serde(default)]
    pub stream: usize,
    /// MIME type hint handed to the engine.
    #[serde(default)]
    pub stream_content: String,
}

impl Station {
    pub fn new(id: impl Into<String>, name: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let stream_content = guess_content_type(&uri).to_string();
        Self {
            id: id.into(),
            name: name.into(),
            stream_uris: vec![uri],
            stream: 0,
            stream_content,
        }
    }

    /// Record wrapping a raw stream address, used for direct playback
    /// outside the collection.
    pub fn transient(uri: &str) -> Self {
        Self::new(uri, uri, uri)
    }

    /// Currently selected stream address, or `""` when there is none.
    pub fn stream_uri(&self) -> &str {
        self.stream_uris
            .get(self.stream)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty() && !self.stream_uri().is_empty()
    }

    pub fn content_type_hint(&self) -> Option<&str> {
        match self.stream_content.as_str() {
            "" | CONTENT_TYPE_UNSUPPORTED => None,
            other => Some(other),
        }
    }
}

fn guess_content_type(uri: &str) -> &'static str {
    let lower = uri.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    if path.is_empty() {
        CONTENT_TYPE_UNSUPPORTED
    } else if path.ends_with(".m3u8") {
        CONTENT_TYPE_HLS
    } else {
        CONTENT_TYPE_MPEG
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Next,
    Previous,
}

/// Read access to the ordered station collection owned by the host.
pub trait StationCollection {
    fn get_by_id(&self, id: &str) -> Option<Station>;

    /// Station next to `id`, wrapping around at both ends.  `None` when `id`
    /// is not part of the collection.
    fn get_adjacent(&self, id: &str, direction: Direction) -> Option<Station>;

    fn all(&self) -> Vec<Station>;
}

/// In-memory station list in collection order.
#[derive(Debug, Clone, Default)]
pub struct StationList {
    stations: Vec<Station>,
}

impl StationList {
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.stations.iter().position(|s| s.id == id)
    }
}

impl StationCollection for StationList {
    fn get_by_id(&self, id: &str) -> Option<Station> {
        self.position(id).map(|i| self.stations[i].clone())
    }

    fn get_adjacent(&self, id: &str, direction: Direction) -> Option<Station> {
        let len = self.stations.len();
        let current = self.position(id)?;
        let idx = match direction {
            Direction::Next => (current + 1) % len,
            Direction::Previous => {
                if current == 0 {
                    len - 1
                } else {
                    current - 1
                }
            }
        };
        Some(self.stations[idx].clone())
    }

    fn all(&self) -> Vec<Station> {
        self.stations.clone()
    }
}

// ── m3u loader ────────────────────────────────────────────────────────────────

pub fn parse_m3u_from_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let mut stations = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let name = pending_name.take().unwrap_or_else(|| line.to_string());
        stations.push(Station::new(line, name, line));
    }

    Ok(stations)
}

pub fn load_stations_from_m3u(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_m3u_from_str(&content)
}

// ── TOML loader ───────────────────────────────────────────────────────────────

/// Matches the `[[station]]` tables of a stations file.  Kept apart from
/// `Station` so the file schema can stay friendlier than the model.
#[derive(Debug, Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, Deserialize)]
struct TomlStation {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    url: String,
    /// Alternative stream addresses; `url` (if set) comes first.
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    content_type: String,
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let stations = file
        .station
        .into_iter()
        .map(|s| {
            let mut stream_uris = Vec::with_capacity(1 + s.urls.len());
            if !s.url.is_empty() {
                stream_uris.push(s.url);
            }
            stream_uris.extend(s.urls.into_iter().filter(|u| !u.is_empty()));

            let first = stream_uris.first().cloned().unwrap_or_default();
            let id = if s.id.is_empty() { first.clone() } else { s.id };
            let stream_content = if s.content_type.is_empty() {
                guess_content_type(&first).to_string()
            } else {
                s.content_type
            };
            Station {
                id,
                name: s.name,
                stream_uris,
                stream: 0,
                stream_content,
            }
        })
        .collect();
    Ok(stations)
}
