/// Price label used when a venue shows no price text.
pub const PRICE_UNAVAILABLE: &str = "unavailable";

/// Year every parsed show date (and the reference day) is pinned to before
/// comparing. Venue listings usually print "Thu Jun 12" with no year, and a
/// leap year keeps "Feb 29" representable.
pub const REFERENCE_YEAR: i32 = 2024;

/// Attribute read for image fields unless a venue overrides it.
pub const DEFAULT_IMAGE_ATTR: &str = "src";

pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DETAIL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_VENUE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_BROWSER_LAUNCH_TIMEOUT_MS: u64 = 20_000;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DAILY_AT: &str = "03:00";
pub const DEFAULT_CACHE_PATH: &str = "scraper_cache.db";

/// Cache path value that selects the non-durable in-memory store.
pub const IN_MEMORY_CACHE: &str = ":memory:";
