use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::local::CheckinStore;

/// A named location from the catalogue file.
#[derive(Debug, Clone, Deserialize)]
pub struct Point {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cn: String,
    pub geo: [f64; 2],
    /// Episode number.
    #[serde(default)]
    pub ep: Option<u32>,
    /// Timestamp within the episode, in seconds.
    #[serde(default)]
    pub s: Option<u32>,
    /// Reference screenshot, usually `./`-relative.
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default, rename = "characterId")]
    pub character_id: Option<String>,
}

impl Point {
    pub fn lat(&self) -> f64 {
        self.geo[0]
    }

    pub fn lng(&self) -> f64 {
        self.geo[1]
    }

    pub fn display_name(&self) -> &str {
        if self.cn.is_empty() {
            &self.name
        } else {
            &self.cn
        }
    }

    /// `ep 3 2:05` style label; missing parts are left out.
    pub fn episode_label(&self) -> String {
        match (self.ep, self.s) {
            (Some(ep), Some(s)) => format!("ep {} {}:{:02}", ep, s / 60, s % 60),
            (Some(ep), None) => format!("ep {}", ep),
            (None, Some(s)) => format!("{}:{:02}", s / 60, s % 60),
            (None, None) => String::new(),
        }
    }

    /// Resolve the reference path against `asset_base` (URL or directory).
    pub fn reference_source(&self, asset_base: &str) -> Option<String> {
        let reference = self.reference.as_deref()?;
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Some(reference.to_string());
        }
        let relative = reference.strip_prefix("./").unwrap_or(reference);
        Some(format!("{}/{}", asset_base.trim_end_matches('/'), relative))
    }
}

pub fn load(path: &Path) -> anyhow::Result<Vec<Point>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read points file {}: {}", path.display(), e))?;
    let points: Vec<Point> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse points file {}: {}", path.display(), e))?;
    tracing::debug!("Loaded {} points from {}", points.len(), path.display());
    Ok(points)
}

/// Search keywords per character, and which character each point belongs to
/// when the catalogue does not say.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Characters {
    #[serde(default)]
    pub keywords: HashMap<String, Vec<String>>,
    /// Point id -> character id.
    #[serde(default)]
    pub assign: HashMap<String, String>,
}

impl Characters {
    pub fn character_of<'a>(&'a self, point: &'a Point) -> &'a str {
        point
            .character_id
            .as_deref()
            .or_else(|| self.assign.get(&point.id).map(String::as_str))
            .unwrap_or("default")
    }

    pub fn keywords_for(&self, point: &Point) -> &[String] {
        self.keywords
            .get(self.character_of(point))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub query: String,
    pub only_checked: bool,
    pub only_unchecked: bool,
    pub characters: Characters,
}

impl Filter {
    pub fn matches(&self, point: &Point, checkins: &CheckinStore) -> bool {
        let checked = checkins.is_checked(&point.id);
        // Both toggles on cancel each other out.
        match (self.only_checked, self.only_unchecked) {
            (true, false) if !checked => return false,
            (false, true) if checked => return false,
            _ => {}
        }

        let query = self.query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        let text = format!("{}{}{}", point.cn, point.name, point.id).to_lowercase();
        text.contains(&query)
            || self
                .characters
                .keywords_for(point)
                .iter()
                .any(|k| k.to_lowercase().contains(&query))
    }

    pub fn apply<'a>(&self, points: &'a [Point], checkins: &CheckinStore) -> Vec<&'a Point> {
        points.iter().filter(|p| self.matches(p, checkins)).collect()
    }
}

pub fn find<'a>(points: &'a [Point], id: &str) -> Option<&'a Point> {
    points.iter().find(|p| p.id == id)
}

/// (checked, total)
pub fn progress(points: &[Point], checkins: &CheckinStore) -> (usize, usize) {
    let checked = points.iter().filter(|p| checkins.is_checked(&p.id)).count();
    (checked, points.len())
}
