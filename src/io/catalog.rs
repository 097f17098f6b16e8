use crate::config::ProcessingConfig;
use crate::types::{
    BandId, GeoBoundingBox, GreenError, GreenResult, ProjectedBounds, SceneCandidate,
    SceneFootprint,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Highest cloud ceiling the searcher relaxes to
pub const MAX_RELAXED_CLOUD_COVER: f64 = 50.0;
const RELAXATION_FACTOR: f64 = 2.5;

/// Inclusive acquisition window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> GreenResult<Self> {
        if start > end {
            return Err(GreenError::InvalidInput(format!(
                "date range starts after it ends: {} > {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// First to last calendar day of a month
    pub fn month(year: i32, month: u32) -> GreenResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| GreenError::InvalidInput(format!("invalid month {}-{}", year, month)))?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| GreenError::InvalidInput(format!("invalid month {}-{}", year, month)))?;
        Ok(Self { start, end })
    }

    /// Whole calendar year(s) spanned by this range
    pub fn containing_year(&self) -> Self {
        let start = NaiveDate::from_ymd_opt(self.start.year(), 1, 1).unwrap_or(self.start);
        let end = NaiveDate::from_ymd_opt(self.end.year(), 12, 31).unwrap_or(self.end);
        Self { start, end }
    }

    /// RFC 3339 interval used by STAC `datetime`
    pub fn to_interval(&self) -> String {
        format!("{}T00:00:00Z/{}T23:59:59Z", self.start, self.end)
    }

    pub fn label(&self) -> String {
        format!("{} to {}", self.start, self.end)
    }
}

/// One catalog search request
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub collection: String,
    pub bbox: GeoBoundingBox,
    pub dates: DateRange,
    /// Strict upper bound on scene cloud cover (percent)
    pub cloud_cover_lt: f64,
}

/// Imagery catalog seam; implemented over HTTP by [`StacCatalog`]
pub trait ImageryCatalog: Send + Sync {
    fn search(&self, query: &CatalogQuery) -> GreenResult<Vec<SceneCandidate>>;
}

/// Candidates from the first search stage that returned anything
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Sorted ascending by cloud cover
    pub candidates: Vec<SceneCandidate>,
    pub attempts: usize,
    pub cloud_ceiling: f64,
    pub dates: DateRange,
}

/// Catalog search with progressive relaxation of cloud and date limits
pub struct CatalogSearcher<'a> {
    catalog: &'a dyn ImageryCatalog,
    collection: String,
}

impl<'a> CatalogSearcher<'a> {
    pub fn new(catalog: &'a dyn ImageryCatalog, collection: &str) -> Self {
        Self {
            catalog,
            collection: collection.to_string(),
        }
    }

    /// Ceiling for the second and third attempts
    pub fn relaxed_ceiling(cloud_cover_lt: f64) -> f64 {
        (cloud_cover_lt * RELAXATION_FACTOR)
            .min(MAX_RELAXED_CLOUD_COVER)
            .max(cloud_cover_lt)
    }

    /// Original window, then relaxed clouds, then the containing year at relaxed clouds
    pub fn search(
        &self,
        bbox: &GeoBoundingBox,
        dates: &DateRange,
        cloud_cover_lt: f64,
    ) -> GreenResult<SearchOutcome> {
        let relaxed = Self::relaxed_ceiling(cloud_cover_lt);
        let stages = [
            (*dates, cloud_cover_lt),
            (*dates, relaxed),
            (dates.containing_year(), relaxed),
        ];

        for (attempt, (window, ceiling)) in stages.iter().enumerate() {
            let query = CatalogQuery {
                collection: self.collection.clone(),
                bbox: *bbox,
                dates: *window,
                cloud_cover_lt: *ceiling,
            };
            log::info!(
                "Catalog search {}/{}: {} with cloud cover < {:.1}%",
                attempt + 1,
                stages.len(),
                window.label(),
                ceiling
            );

            let mut candidates = self.catalog.search(&query)?;
            if candidates.is_empty() {
                log::warn!("No scenes found for {} at < {:.1}% cloud", window.label(), ceiling);
                continue;
            }

            candidates.sort_by(|a, b| a.cloud_cover.total_cmp(&b.cloud_cover));
            log::info!("Found {} candidate scenes", candidates.len());
            return Ok(SearchOutcome {
                candidates,
                attempts: attempt + 1,
                cloud_ceiling: *ceiling,
                dates: *window,
            });
        }

        Err(GreenError::NoImageryFound { attempts: stages.len() })
    }
}

/// Rewrite `s3://bucket/key` into the bucket's public HTTPS endpoint
pub fn s3_to_https(href: &str) -> String {
    match href.strip_prefix("s3://") {
        Some(rest) => match rest.split_once('/') {
            Some((bucket, key)) => format!("https://{}.s3.amazonaws.com/{}", bucket, key),
            None => format!("https://{}.s3.amazonaws.com/", rest),
        },
        None => href.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
struct StacSearchBody {
    collections: Vec<String>,
    bbox: [f64; 4],
    datetime: String,
    limit: u32,
    query: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StacItemCollection {
    #[serde(default)]
    features: Vec<StacItem>,
    #[serde(default)]
    links: Vec<StacLink>,
}

#[derive(Debug, Deserialize)]
struct StacItem {
    id: String,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Deserialize)]
struct StacAsset {
    href: String,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct StacLink {
    rel: String,
    href: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

/// STAC API catalog over blocking HTTP
pub struct StacCatalog {
    search_url: String,
    client: reqwest::blocking::Client,
    page_size: u32,
    max_items: usize,
}

impl StacCatalog {
    pub fn new(root_url: &str, timeout_secs: u64) -> GreenResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("greenspace/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GreenError::Catalog(format!("Failed to create HTTP client: {}", e)))?;

        let root = root_url.trim_end_matches('/');
        let search_url = if root.ends_with("/search") {
            root.to_string()
        } else {
            format!("{}/search", root)
        };

        Ok(Self {
            search_url,
            client,
            page_size: 100,
            max_items: 200,
        })
    }

    pub fn from_config(config: &ProcessingConfig) -> GreenResult<Self> {
        Self::new(&config.catalog_url, config.asset_timeout_secs)
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    fn post_page(&self, url: &str, body: &serde_json::Value) -> GreenResult<StacItemCollection> {
        let response = self.client.post(url).json(body).send()?;
        Self::read_page(response)
    }

    fn get_page(&self, url: &str) -> GreenResult<StacItemCollection> {
        let response = self.client.get(url).send()?;
        Self::read_page(response)
    }

    fn read_page(response: reqwest::blocking::Response) -> GreenResult<StacItemCollection> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(GreenError::Catalog(format!(
                "STAC search returned HTTP {}: {}",
                status.as_u16(),
                text.chars().take(300).collect::<String>()
            )));
        }
        Ok(response.json::<StacItemCollection>()?)
    }
}

impl ImageryCatalog for StacCatalog {
    fn search(&self, query: &CatalogQuery) -> GreenResult<Vec<SceneCandidate>> {
        let body = StacSearchBody {
            collections: vec![query.collection.clone()],
            bbox: query.bbox.as_array(),
            datetime: query.dates.to_interval(),
            limit: self.page_size,
            query: serde_json::json!({ "eo:cloud_cover": { "lt": query.cloud_cover_lt } }),
        };
        let body = serde_json::to_value(&body)?;

        let mut items = Vec::new();
        let mut page = self.post_page(&self.search_url, &body)?;
        loop {
            let next = page.links.iter().find(|l| l.rel == "next").cloned();
            items.append(&mut page.features);
            if items.len() >= self.max_items {
                break;
            }
            match next {
                Some(link) if link.method.as_deref().map(|m| m.eq_ignore_ascii_case("POST")) == Some(true) => {
                    let mut next_body = body.clone();
                    if let (Some(base), Some(extra)) = (
                        next_body.as_object_mut(),
                        link.body.as_ref().and_then(|b| b.as_object()),
                    ) {
                        for (k, v) in extra {
                            base.insert(k.clone(), v.clone());
                        }
                    }
                    page = self.post_page(&link.href, &next_body)?;
                }
                Some(link) => page = self.get_page(&link.href)?,
                None => break,
            }
            if page.features.is_empty() {
                break;
            }
        }
        items.truncate(self.max_items);
        log::debug!("STAC returned {} items", items.len());

        Ok(items.into_iter().filter_map(candidate_from_item).collect())
    }
}

fn candidate_from_item(item: StacItem) -> Option<SceneCandidate> {
    let acquired = match item
        .properties
        .get("datetime")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            log::debug!("Skipping item {} without a parseable datetime", item.id);
            return None;
        }
    };
    let cloud_cover = item
        .properties
        .get("eo:cloud_cover")
        .and_then(|v| v.as_f64())
        .unwrap_or(100.0);

    let mut assets = HashMap::new();
    for band in [BandId::Red, BandId::Green, BandId::Blue, BandId::Nir, BandId::Scl] {
        if let Some(asset) = band.asset_keys().iter().find_map(|key| item.assets.get(*key)) {
            assets.insert(band, s3_to_https(&asset.href));
        }
    }

    let footprint = footprint_from_item(&item);
    Some(SceneCandidate {
        id: item.id,
        acquired,
        cloud_cover,
        assets,
        footprint,
    })
}

fn epsg_from_properties(properties: &HashMap<String, serde_json::Value>) -> Option<u32> {
    if let Some(epsg) = properties.get("proj:epsg").and_then(|v| v.as_u64()) {
        return Some(epsg as u32);
    }
    properties
        .get("proj:code")
        .and_then(|v| v.as_str())
        .and_then(|code| code.strip_prefix("EPSG:"))
        .and_then(|code| code.parse().ok())
}

/// Native bounds from `proj:transform` and `proj:shape` on the red asset or the item
fn footprint_from_item(item: &StacItem) -> Option<SceneFootprint> {
    let red = BandId::Red
        .asset_keys()
        .iter()
        .find_map(|key| item.assets.get(*key));
    let epsg = red
        .and_then(|a| epsg_from_properties(&a.extra))
        .or_else(|| epsg_from_properties(&item.properties))?;

    let lookup = |key: &str| -> Option<Vec<f64>> {
        red.and_then(|a| a.extra.get(key))
            .or_else(|| item.properties.get(key))
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|x| x.as_f64()).collect())
    };
    let transform = lookup("proj:transform")?;
    let shape = lookup("proj:shape")?;
    if transform.len() < 6 || shape.len() < 2 {
        return None;
    }

    let (rows, cols) = (shape[0], shape[1]);
    let x0 = transform[2];
    let y0 = transform[5];
    let x1 = x0 + transform[0] * cols;
    let y1 = y0 + transform[4] * rows;
    Some(SceneFootprint {
        epsg,
        bounds: ProjectedBounds::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedCatalog {
        /// Number of leading calls that return nothing
        empty_calls: usize,
        calls: Mutex<Vec<CatalogQuery>>,
    }

    impl ImageryCatalog for ScriptedCatalog {
        fn search(&self, query: &CatalogQuery) -> GreenResult<Vec<SceneCandidate>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(query.clone());
            if calls.len() <= self.empty_calls {
                return Ok(vec![]);
            }
            Ok([35.0, 5.0, 12.0]
                .iter()
                .enumerate()
                .map(|(i, cloud)| SceneCandidate {
                    id: format!("S2_{}", i),
                    acquired: Utc::now(),
                    cloud_cover: *cloud,
                    assets: HashMap::new(),
                    footprint: None,
                })
                .collect())
        }
    }

    fn bbox() -> GeoBoundingBox {
        GeoBoundingBox::new(2.22, 48.81, 2.47, 48.90).unwrap()
    }

    #[test]
    fn test_month_range() {
        let feb = DateRange::month(2024, 2).unwrap();
        assert_eq!(feb.end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let dec = DateRange::month(2023, 12).unwrap();
        assert_eq!(dec.end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(dec.to_interval(), "2023-12-01T00:00:00Z/2023-12-31T23:59:59Z");
        assert!(DateRange::month(2023, 13).is_err());
    }

    #[test]
    fn test_relaxed_ceiling_is_capped() {
        assert_eq!(CatalogSearcher::relaxed_ceiling(10.0), 25.0);
        assert_eq!(CatalogSearcher::relaxed_ceiling(30.0), 50.0);
        assert_eq!(CatalogSearcher::relaxed_ceiling(70.0), 70.0);
    }

    #[test]
    fn test_results_sorted_by_cloud() {
        let catalog = ScriptedCatalog { empty_calls: 0, calls: Mutex::new(vec![]) };
        let searcher = CatalogSearcher::new(&catalog, "sentinel-2-l2a");
        let outcome = searcher
            .search(&bbox(), &DateRange::month(2024, 6).unwrap(), 20.0)
            .unwrap();

        let clouds: Vec<f64> = outcome.candidates.iter().map(|c| c.cloud_cover).collect();
        assert_eq!(clouds, vec![5.0, 12.0, 35.0]);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_relaxation_widens_dates_last() {
        let catalog = ScriptedCatalog { empty_calls: 2, calls: Mutex::new(vec![]) };
        let searcher = CatalogSearcher::new(&catalog, "sentinel-2-l2a");
        let june = DateRange::month(2024, 6).unwrap();
        let outcome = searcher.search(&bbox(), &june, 20.0).unwrap();

        assert_eq!(outcome.attempts, 3);
        let calls = catalog.calls.lock().unwrap();
        assert_eq!(calls[0].cloud_cover_lt, 20.0);
        assert_eq!(calls[1].cloud_cover_lt, 50.0);
        assert_eq!(calls[1].dates, june);
        assert_eq!(calls[2].dates.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(calls[2].dates.end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn test_no_imagery_after_three_attempts() {
        let catalog = ScriptedCatalog { empty_calls: usize::MAX, calls: Mutex::new(vec![]) };
        let searcher = CatalogSearcher::new(&catalog, "sentinel-2-l2a");
        let err = searcher
            .search(&bbox(), &DateRange::month(2024, 1).unwrap(), 20.0)
            .unwrap_err();
        assert!(matches!(err, GreenError::NoImageryFound { attempts: 3 }));
        assert_eq!(catalog.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_s3_rewrite() {
        assert_eq!(
            s3_to_https("s3://sentinel-cogs/tiles/33/U/UU/B04.tif"),
            "https://sentinel-cogs.s3.amazonaws.com/tiles/33/U/UU/B04.tif"
        );
        assert_eq!(s3_to_https("https://x.org/a.tif"), "https://x.org/a.tif");
    }

    #[test]
    fn test_search_endpoint_from_config() {
        let catalog = StacCatalog::from_config(&ProcessingConfig::default()).unwrap();
        assert_eq!(catalog.search_url(), "https://earth-search.aws.element84.com/v1/search");
        let explicit = StacCatalog::new("https://stac.example.org/api/search/", 5).unwrap();
        assert_eq!(explicit.search_url(), "https://stac.example.org/api/search");
    }

    #[test]
    fn test_item_parsing_with_fallback_keys() {
        let item: StacItem = serde_json::from_value(serde_json::json!({
            "id": "S2B_33UUU_20240612_0_L2A",
            "properties": {
                "datetime": "2024-06-12T10:16:21.024000Z",
                "eo:cloud_cover": 3.2,
                "proj:code": "EPSG:32633"
            },
            "assets": {
                "B04": {
                    "href": "s3://sentinel-cogs/B04.tif",
                    "proj:transform": [10.0, 0.0, 300000.0, 0.0, -10.0, 5900040.0],
                    "proj:shape": [10980, 10980]
                },
                "green": {"href": "https://x/green.tif"},
                "blue": {"href": "https://x/blue.tif"},
                "nir": {"href": "https://x/nir.tif"}
            }
        }))
        .unwrap();

        let candidate = candidate_from_item(item).unwrap();
        assert_eq!(candidate.cloud_cover, 3.2);
        assert_eq!(candidate.asset(BandId::Red), Some("https://sentinel-cogs.s3.amazonaws.com/B04.tif"));
        assert!(candidate.asset(BandId::Scl).is_none());

        let footprint = candidate.footprint.unwrap();
        assert_eq!(footprint.epsg, 32633);
        assert_eq!(footprint.bounds.min_x, 300000.0);
        assert_eq!(footprint.bounds.max_x, 409800.0);
        assert_eq!(footprint.bounds.min_y, 5790240.0);
    }
}
