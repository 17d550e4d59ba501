pub const CAPTCHA_API_KEY_ENV_NAME: &str = "NIUPEPA_CAPTCHA_API_KEY";

pub const DEFAULT_LISTING_URL: &str = "http://www.nzdl.org/cgi-bin/library.cgi?gg=text&e=d-00000-00---off-0niupepa--00-0----0-10-0---0---0direct-10---4-------0-1l--11-en-50---20-about---00-0-1-00-0-0-11-1-0utfZz-8-00&a=d&cl=CL2.1";

pub const DEFAULT_CACHE_DIR: &str = "cache";
pub const DEFAULT_NAMESPACE: &str = "niupepa";
pub const DEFAULT_DB_PATH: &str = "niupepa.sqlite";

pub const CACHE_FORMAT_VERSION: u32 = 1;
pub const CACHE_INDEX_FILE: &str = "index.json";
pub const CHECKPOINT_FILE: &str = "progress.json";
pub const BODIES_DIR: &str = "bodies";
pub const BODY_ENTRY_NAME: &str = "content.html";
pub const DEFAULT_SAVE_FREQUENCY: u64 = 10;

pub const MAX_FETCH_ATTEMPTS: u32 = 3;
pub const CAPTCHA_TIMEOUT_SECS: u64 = 1200;
pub const MARKER_TIMEOUT_SECS: u64 = 10;
pub const POLL_INTERVAL_MILLIS: u64 = 3000;
pub const CAPTCHA_SELECTOR: &str = "iframe[role=presentation]";
pub const MARKER_SELECTOR: &str = "div.pageinfo";
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36";

pub const TWO_CAPTCHA_SUBMIT_URL: &str = "http://2captcha.com/in.php";
pub const TWO_CAPTCHA_RESULT_URL: &str = "http://2captcha.com/res.php";

pub const MAX_PAGES_PER_WALK: usize = 500;

pub const INITIAL_BATCH_SIZE: usize = 5000;
pub const BATCH_SHRINK_FACTOR: f64 = 0.9;
pub const MINIMUM_BATCH_SIZE: usize = 1;

pub const EXPORT_SOURCE: &str = "NZDL";
