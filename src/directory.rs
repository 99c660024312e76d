// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Lookups into the static schedule. The GTFS loader that feeds these is
//! outside this crate; caches only see the [`TransitDirectory`] trait.

use crate::error::{LarchError, LarchResult};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteInfo {
    pub id: CompactString,
    pub short_name: CompactString,
    pub long_name: Option<CompactString>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StopInfo {
    pub id: CompactString,
    /// Numeric public stop code printed on signs, when the agency has one.
    pub code: Option<u32>,
    pub name: CompactString,
}

pub trait TransitDirectory: Send + Sync {
    fn route_by_id(&self, route_id: &str) -> Option<RouteInfo>;

    fn route_by_short_name(&self, short_name: &str) -> Option<RouteInfo>;

    fn stop_by_id(&self, stop_id: &str) -> Option<StopInfo>;

    fn stop_by_code(&self, code: u32) -> Option<StopInfo>;

    fn routes_for_stop(&self, stop_id: &str) -> Vec<RouteInfo>;

    /// Accepts a short name or a GTFS route id.
    fn resolve_route(&self, route: &str) -> Option<RouteInfo> {
        self.route_by_short_name(route)
            .or_else(|| self.route_by_id(route))
    }

    /// Accepts a GTFS stop id or a numeric stop code.
    fn resolve_stop(&self, stop: &str) -> Option<StopInfo> {
        self.stop_by_id(stop).or_else(|| {
            stop.trim()
                .parse::<u32>()
                .ok()
                .and_then(|code| self.stop_by_code(code))
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTransitDirectory {
    routes: AHashMap<CompactString, RouteInfo>,
    short_names: AHashMap<CompactString, CompactString>,
    stops: AHashMap<CompactString, StopInfo>,
    stop_codes: AHashMap<u32, CompactString>,
    routes_by_stop: AHashMap<CompactString, Vec<CompactString>>,
}

impl InMemoryTransitDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: RouteInfo) -> &mut Self {
        self.short_names
            .insert(route.short_name.clone(), route.id.clone());
        self.routes.insert(route.id.clone(), route);
        self
    }

    pub fn add_stop(&mut self, stop: StopInfo) -> &mut Self {
        if let Some(code) = stop.code {
            self.stop_codes.insert(code, stop.id.clone());
        }
        self.stops.insert(stop.id.clone(), stop);
        self
    }

    /// Records that `route_id` serves `stop_id`.
    pub fn link(&mut self, route_id: &str, stop_id: &str) -> &mut Self {
        let routes = self
            .routes_by_stop
            .entry(CompactString::from(stop_id))
            .or_default();
        if !routes.iter().any(|r| r == route_id) {
            routes.push(CompactString::from(route_id));
        }
        self
    }

    pub fn into_shared(self) -> Arc<dyn TransitDirectory> {
        Arc::new(self)
    }

    pub fn from_ron_file(path: &Path) -> LarchResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LarchError::Config(format!("{}: {}", path.display(), e)))?;
        let snapshot = ron::from_str::<DirectorySnapshot>(&contents)
            .map_err(|e| LarchError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from(snapshot))
    }
}

/// Serialized form of a directory, exported by the schedule loader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySnapshot {
    pub routes: Vec<RouteInfo>,
    pub stops: Vec<StopInfo>,
    /// `(route_id, stop_id)` pairs.
    pub route_stops: Vec<(CompactString, CompactString)>,
}

impl From<DirectorySnapshot> for InMemoryTransitDirectory {
    fn from(snapshot: DirectorySnapshot) -> Self {
        let mut directory = InMemoryTransitDirectory::new();
        for route in snapshot.routes {
            directory.add_route(route);
        }
        for stop in snapshot.stops {
            directory.add_stop(stop);
        }
        for (route_id, stop_id) in &snapshot.route_stops {
            directory.link(route_id, stop_id);
        }
        directory
    }
}

impl TransitDirectory for InMemoryTransitDirectory {
    fn route_by_id(&self, route_id: &str) -> Option<RouteInfo> {
        self.routes.get(route_id).cloned()
    }

    fn route_by_short_name(&self, short_name: &str) -> Option<RouteInfo> {
        self.short_names
            .get(short_name)
            .and_then(|id| self.routes.get(id))
            .cloned()
    }

    fn stop_by_id(&self, stop_id: &str) -> Option<StopInfo> {
        self.stops.get(stop_id).cloned()
    }

    fn stop_by_code(&self, code: u32) -> Option<StopInfo> {
        self.stop_codes
            .get(&code)
            .and_then(|id| self.stops.get(id))
            .cloned()
    }

    fn routes_for_stop(&self, stop_id: &str) -> Vec<RouteInfo> {
        self.routes_by_stop
            .get(stop_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.routes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Route "r38" (short name "38") and "r5" ("5") both serving stop
    /// "s100" (code 14100); "r38" also serves "s200".
    pub fn sample_directory() -> Arc<dyn TransitDirectory> {
        let mut directory = InMemoryTransitDirectory::new();
        directory
            .add_route(RouteInfo {
                id: "r38".into(),
                short_name: "38".into(),
                long_name: Some("Geary".into()),
            })
            .add_route(RouteInfo {
                id: "r5".into(),
                short_name: "5".into(),
                long_name: Some("Fulton".into()),
            })
            .add_stop(StopInfo {
                id: "s100".into(),
                code: Some(14100),
                name: "Market & 4th".into(),
            })
            .add_stop(StopInfo {
                id: "s200".into(),
                code: None,
                name: "Ocean Beach".into(),
            })
            .link("r38", "s100")
            .link("r5", "s100")
            .link("r38", "s200");
        directory.into_shared()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_directory;
    use super::*;

    #[test]
    fn snapshot_from_ron_builds_links() {
        let snapshot: DirectorySnapshot = ron::from_str(
            r#"(
                routes: [(id: "r1", short_name: "1", long_name: None)],
                stops: [(id: "s1", code: Some(501), name: "Main")],
                route_stops: [("r1", "s1"), ("r1", "s1")],
            )"#,
        )
        .unwrap();
        let directory = InMemoryTransitDirectory::from(snapshot);

        assert_eq!(directory.resolve_stop("501").unwrap().id, "s1");
        assert_eq!(directory.routes_for_stop("s1").len(), 1);
    }

    #[test]
    fn resolves_by_id_short_name_or_code() {
        let directory = sample_directory();

        assert_eq!(directory.resolve_route("38").unwrap().id, "r38");
        assert_eq!(directory.resolve_route("r38").unwrap().short_name, "38");
        assert!(directory.resolve_route("99").is_none());

        assert_eq!(directory.resolve_stop("s100").unwrap().name, "Market & 4th");
        assert_eq!(directory.resolve_stop("14100").unwrap().id, "s100");
        assert!(directory.resolve_stop("nowhere").is_none());
    }

    #[test]
    fn routes_for_stop_lists_each_route_once() {
        let directory = sample_directory();
        let mut short_names: Vec<String> = directory
            .routes_for_stop("s100")
            .into_iter()
            .map(|r| r.short_name.to_string())
            .collect();
        short_names.sort();
        assert_eq!(short_names, vec!["38", "5"]);
        assert!(directory.routes_for_stop("s999").is_empty());
    }
}
