//! Integration tests for the crawler
//!
//! These tests use wiremock to stand up a small shop and run whole crawls
//! against it, from seeding to the JSON-lines dataset.

use async_trait::async_trait;
use pricewatch::config::{validate, Config, CrawlMode};
use pricewatch::crawler::{ChallengeError, Coordinator, CrawlOptions, SessionIdentity, Solver};
use pricewatch::storage::{RunStatus, SqliteStorage, Storage};
use pricewatch::{CrawlError, Record};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const START_PAGE: &str = r#"<html><body><ul class="menu">
    <li><a data-strid="1" href="/tv_c1.html">Televize</a></li>
    <li><a data-strid="2" href="/audio_c2.html">Audio</a></li>
</ul></body></html>"#;

fn product(id: &str, name: &str, price: &str, original: Option<&str>) -> String {
    let original = original
        .map(|p| format!(r#"<span class="mc">{} Kč</span>"#, p))
        .unwrap_or_default();
    format!(
        r#"<div class="prodbox" data-stiid="{id}">
            <div class="img"><img data-src="/img/{id}.jpg"></div>
            <h2><a href="/p_d{id}.html">{name}</a></h2>
            <div class="price"><span class="wvat">{price} Kč</span>{original}</div>
        </div>"#
    )
}

fn listing(crumb: &str, count: u64, products: &[String]) -> String {
    format!(
        r#"<html><body>
        <div class="navbar"><ul><li class="hp">Domů</li><li>{crumb}</li></ul></div>
        <p class="reccount">{count} produktů</p>
        {}
        </body></html>"#,
        products.join("\n")
    )
}

fn test_config(server: &MockServer, dir: &TempDir, mode: CrawlMode, extra: &str) -> Config {
    let base = server.uri();
    let toml = format!(
        r#"
[crawler]
max-concurrency = 3
max-request-retries = 2
retry-delay-ms = 0
fetch-timeout-secs = 5
checkpoint-interval-secs = 1
jitter-ms = [0, 0]

[challenge]
enabled = true
solver-url = "{base}/solver"
cooldown-ms = 0

[seeds]
mode = "{mode}"
start-urls = ["{base}/"]
test-url = "{base}/challenged_c9.html"
price-feed-url = "{base}/feed.csv"
price-endpoint = "{base}/Product/GetPrices"
price-batch-size = 2

[site]
category-link-selector = 'ul.menu a[data-strid]'
category-id-attribute = "data-strid"
product-selector = ".prodbox"
item-id-attribute = "data-stiid"
name-selector = "h2 a"
link-selector = "h2 a"
price-selector = ".price .wvat"
original-price-selector = ".price .mc"
image-selector = ".img img"
image-attribute = "data-src"
breadcrumb-selector = ".navbar ul > li:not(.hp)"
record-count-selector = "p.reccount"
page-size = 2
page-url-template = "{{url}}?page={{page}}"

[output]
database-path = "{db}"
dataset-path = "{dataset}"

{extra}
"#,
        db = dir.path().join("crawl.db").display(),
        dataset = dir.path().join("dataset.jsonl").display(),
    );
    let config: Config = toml::from_str(&toml).expect("test config should parse");
    validate(&config).expect("test config should validate");
    config
}

const DEVELOPMENT: &str = "[post-processing]\ndevelopment = true\n";

async fn mount_shop(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(START_PAGE))
        .expect(1)
        .mount(server)
        .await;

    // Page 2 is mounted first so it wins over the bare category path.
    Mock::given(method("GET"))
        .and(path("/tv_c1.html"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(
            "Televize",
            3,
            &[
                product("222", "TV Beta", "9 990", None),
                product("333", "TV Gamma", "5 490", None),
            ],
        )))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tv_c1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(
            "Televize",
            3,
            &[
                product("111", "TV Alpha", "12 990", Some("14 990")),
                product("222", "TV Beta", "9 990", None),
            ],
        )))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/audio_c2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(
            "Audio",
            1,
            &[product("444", "Reproduktor", "1 990", None)],
        )))
        .expect(1)
        .mount(server)
        .await;
}

fn read_dataset(dir: &TempDir) -> Vec<Record> {
    let contents = std::fs::read_to_string(dir.path().join("dataset.jsonl")).unwrap();
    contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn sorted_ids(records: &[Record]) -> Vec<String> {
    let mut ids: Vec<String> = records.iter().map(|r| r.item_id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_full_crawl_follows_categories_and_pages() {
    let server = MockServer::start().await;
    mount_shop(&server).await;
    let dir = TempDir::new().unwrap();

    let config = test_config(&server, &dir, CrawlMode::Full, DEVELOPMENT);
    let coordinator = Coordinator::new(config, "hash", CrawlOptions::default())
        .await
        .unwrap();
    assert!(!coordinator.is_resumed());
    assert_eq!(coordinator.pending(), 1);

    let report = coordinator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.mode, CrawlMode::Full);
    assert_eq!(report.stats.categories_seen, 2);
    assert_eq!(report.stats.pages_fetched, 4);
    assert_eq!(report.stats.pagination_links_enqueued, 1);
    assert_eq!(report.stats.items_emitted, 4);
    assert_eq!(report.stats.items_duplicate, 1);
    assert_eq!(report.stats.items_failed, 0);

    let records = read_dataset(&dir);
    assert_eq!(sorted_ids(&records), vec!["111", "222", "333", "444"]);

    let alpha = records.iter().find(|r| r.item_id == "111").unwrap();
    assert_eq!(alpha.name.as_deref(), Some("TV Alpha"));
    assert_eq!(alpha.current_price, Some(12990));
    assert_eq!(alpha.original_price, Some(14990));
    assert!(alpha.discounted);
    assert_eq!(alpha.category, vec!["Televize"]);
    assert_eq!(alpha.menu_category.as_deref(), Some("Televize"));
    assert_eq!(alpha.source_url, format!("{}/p_d111.html", server.uri()));

    let storage = SqliteStorage::new(&dir.path().join("crawl.db")).unwrap();
    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.mode, "full");
}

struct FixedSolver {
    calls: AtomicUsize,
}

#[async_trait]
impl Solver for FixedSolver {
    async fn solve(
        &self,
        site_key: &str,
        _page_url: &str,
        _identity: &SessionIdentity,
    ) -> Result<String, ChallengeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(site_key, "6LfSHOPKEY");
        Ok("solved-token".to_string())
    }
}

#[tokio::test]
async fn test_challenge_is_solved_and_page_resubmitted() {
    let server = MockServer::start().await;
    let challenge = r#"<html><body><form method="post">
        <div class="g-recaptcha" data-sitekey="6LfSHOPKEY"></div>
        <script src="https://www.google.com/recaptcha/api.js"></script>
    </form></body></html>"#;

    Mock::given(method("POST"))
        .and(path("/challenged_c9.html"))
        .and(body_string_contains("g-recaptcha-response=solved-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(
            "Televize",
            1,
            &[product("555", "TV Delta", "7 990", None)],
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/challenged_c9.html"))
        .respond_with(ResponseTemplate::new(403).set_body_string(challenge))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, &dir, CrawlMode::Test, DEVELOPMENT);
    let solver = Arc::new(FixedSolver {
        calls: AtomicUsize::new(0),
    });

    let report = Coordinator::new(config, "hash", CrawlOptions::default())
        .await
        .unwrap()
        .with_solver(solver.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.stats.challenges_solved, 1);
    assert_eq!(report.stats.challenges_failed, 0);
    assert_eq!(report.stats.items_emitted, 1);
    assert_eq!(sorted_ids(&read_dataset(&dir)), vec!["555"]);
}

#[tokio::test]
async fn test_price_mode_batches_and_publishes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("\"StiId\",\"Name\"\n\"1\",\"A\"\n\"2\",\"B\"\n\"3\",\"C\"\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/Product/GetPrices"))
        .and(body_string_contains("stiidlist=1,2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"StoitemPriceList":[
                {"StiId":1,"StiPrice":1000,"SipPrice0":1200,"TaxRate":21},
                {"StiId":2,"StiPrice":500,"SipPrice0":500,"TaxRate":21}
            ]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/Product/GetPrices"))
        .and(body_string_contains("stiidlist=3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"StoitemPriceList":[{"StiId":3,"StiPrice":100,"SipPrice0":100,"TaxRate":0}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/invalidate"))
        .and(body_json(
            serde_json::json!({"distributionId": "E2DIST", "domain": "shop.cz"}),
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/upload"))
        .and(body_json(serde_json::json!({"datasetName": "shop_price"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let publishing = format!(
        r#"[post-processing]
development = false
distribution-id = "E2DIST"
domain = "shop.cz"
dataset-name = "shop"
invalidate-url = "{base}/hooks/invalidate"
upload-url = "{base}/hooks/upload"
"#,
        base = server.uri()
    );
    let config = test_config(&server, &dir, CrawlMode::Full, &publishing);
    let options = CrawlOptions {
        fresh: false,
        mode: Some(CrawlMode::Price),
    };

    let coordinator = Coordinator::new(config, "hash", options).await.unwrap();
    assert_eq!(coordinator.pending(), 2);
    let report = coordinator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.mode, CrawlMode::Price);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.items_emitted, 3);

    let records = read_dataset(&dir);
    let first = records.iter().find(|r| r.item_id == "1").unwrap();
    assert_eq!(first.current_price, Some(1210));
    assert_eq!(first.original_price, Some(1452));
    assert!(first.discounted);
    let second = records.iter().find(|r| r.item_id == "2").unwrap();
    assert_eq!(second.current_price, Some(605));
    assert!(!second.discounted);
}

#[tokio::test]
async fn test_interrupted_run_resumes() {
    let server = MockServer::start().await;
    mount_shop(&server).await;
    let dir = TempDir::new().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let interrupted = Coordinator::new(
        test_config(&server, &dir, CrawlMode::Full, DEVELOPMENT),
        "hash",
        CrawlOptions::default(),
    )
    .await
    .unwrap()
    .run(cancel)
    .await
    .unwrap();
    assert_eq!(interrupted.status, RunStatus::Interrupted);
    assert_eq!(interrupted.stats.items_emitted, 0);

    let coordinator = Coordinator::new(
        test_config(&server, &dir, CrawlMode::Full, DEVELOPMENT),
        "hash",
        CrawlOptions::default(),
    )
    .await
    .unwrap();
    assert!(coordinator.is_resumed());
    assert_eq!(coordinator.run_id(), interrupted.run_id);
    assert_eq!(coordinator.pending(), 1);

    let resumed = coordinator.run(CancellationToken::new()).await.unwrap();
    assert!(resumed.resumed);
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.stats.items_emitted, 4);
    assert_eq!(sorted_ids(&read_dataset(&dir)), vec!["111", "222", "333", "444"]);
}

#[tokio::test]
async fn test_fresh_run_ignores_resumable_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let first = Coordinator::new(
        test_config(&server, &dir, CrawlMode::Full, DEVELOPMENT),
        "hash",
        CrawlOptions::default(),
    )
    .await
    .unwrap()
    .run(cancel)
    .await
    .unwrap();

    let options = CrawlOptions {
        fresh: true,
        mode: None,
    };
    let coordinator = Coordinator::new(
        test_config(&server, &dir, CrawlMode::Full, DEVELOPMENT),
        "hash",
        options,
    )
    .await
    .unwrap();
    assert!(!coordinator.is_resumed());
    assert_ne!(coordinator.run_id(), first.run_id);
}

#[tokio::test]
async fn test_unreachable_price_feed_fails_startup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.csv"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let config = test_config(&server, &dir, CrawlMode::Price, DEVELOPMENT);
    let result = Coordinator::new(config, "hash", CrawlOptions::default()).await;
    assert!(matches!(result, Err(CrawlError::Startup(_))));

    let storage = SqliteStorage::new(&dir.path().join("crawl.db")).unwrap();
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}
