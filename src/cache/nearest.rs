use crate::cache::error::CacheError;
use crate::cache::weather_file::CachedWeatherFile;
use crate::types::location::LocationQuery;
use haversine::{distance, Location as HaversineLocation, Units};
use log::{debug, warn};
use rstar::RTree;
use std::io;
use std::path::Path;

/// The cache entry closest to a query point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestMatch {
    pub file: CachedWeatherFile,
    /// Euclidean distance in (latitude, longitude) degree space.
    pub degree_distance: f64,
    /// Great-circle distance, for logging and reporting.
    pub distance_km: f64,
}

/// Spatial index over the cached weather files of one directory.
///
/// File names encode the location; names that do not follow the pattern are ignored. The
/// index is rebuilt from a directory listing, so files written after [`Self::scan`] are
/// only seen by a new scan.
#[derive(Debug, Clone)]
pub struct NearestWeatherCache {
    rtree: RTree<CachedWeatherFile>,
}

impl NearestWeatherCache {
    /// Indexes every cache file in `cache_dir`. A missing directory yields an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::DirectoryRead`] if the directory exists but cannot be listed.
    pub fn scan(cache_dir: &Path) -> Result<Self, CacheError> {
        let entries = match std::fs::read_dir(cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Cache directory {:?} does not exist yet", cache_dir);
                return Ok(Self::from_files(Vec::new()));
            }
            Err(e) => return Err(CacheError::DirectoryRead(cache_dir.to_path_buf(), e)),
        };

        let mut files = Vec::new();
        let mut ignored = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::DirectoryRead(cache_dir.to_path_buf(), e))?;
            match CachedWeatherFile::from_path(&entry.path()) {
                Some(file) => files.push(file),
                None => ignored += 1,
            }
        }
        if ignored > 0 {
            debug!(
                "Ignored {} entries in {:?} without a location-encoded name",
                ignored, cache_dir
            );
        }
        Ok(Self::from_files(files))
    }

    pub fn from_files(files: Vec<CachedWeatherFile>) -> Self {
        Self {
            rtree: RTree::bulk_load(files),
        }
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    /// Nearest entry to `location`, or `None` if the index is empty.
    pub fn nearest(&self, location: &LocationQuery) -> Option<NearestMatch> {
        let point = location.as_point();
        let file = self.rtree.nearest_neighbor(&point)?;
        let degree_distance = ((file.latitude - point[0]).powi(2)
            + (file.longitude - point[1]).powi(2))
        .sqrt();
        let distance_km = distance(
            HaversineLocation {
                latitude: location.latitude(),
                longitude: location.longitude(),
            },
            HaversineLocation {
                latitude: file.latitude,
                longitude: file.longitude,
            },
            Units::Kilometers,
        );
        Some(NearestMatch {
            file: file.clone(),
            degree_distance,
            distance_km,
        })
    }

    /// Scans `cache_dir` and returns the entry closest to `location`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheEmpty`] if the directory holds no cache files.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cropweather::cache::nearest::NearestWeatherCache;
    /// use cropweather::LocationQuery;
    /// use std::path::Path;
    ///
    /// let target = LocationQuery::new(11.0, 11.0).unwrap();
    /// let found = NearestWeatherCache::find_closest(&target, Path::new("/tmp/weather")).unwrap();
    /// println!("{:?} is {:.1} km away", found.file.path, found.distance_km);
    /// ```
    pub fn find_closest(
        location: &LocationQuery,
        cache_dir: &Path,
    ) -> Result<NearestMatch, CacheError> {
        let index = Self::scan(cache_dir)?;
        match index.nearest(location) {
            Some(found) => Ok(found),
            None => {
                warn!("No cached weather files in {:?}", cache_dir);
                Err(CacheError::CacheEmpty(cache_dir.to_path_buf()))
            }
        }
    }
}
