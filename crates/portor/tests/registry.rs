//! Registry workflow tests against a local fake registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portor::{
    LookupParams, OcrEngine, OcrError, Portor, RecognitionMode, RegistryClient, RegistryConfig,
    RegistryError, SearchCriteria, SessionAcquirer, CaptchaSolver,
};

// ─────────────────────── helpers ───────────────────────

const SESSION_COOKIE: &str = "JSESSIONID=abc123";

/// PNG signature followed by a tag, enough for format sniffing.
fn png(tag: &str) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

/// OCR engine that recognizes each known image as a fixed string.
struct KnownImages(Vec<(Vec<u8>, &'static str)>);

#[async_trait]
impl OcrEngine for KnownImages {
    async fn recognize(&self, image: &[u8], _mode: RecognitionMode) -> Result<String, OcrError> {
        Ok(self
            .0
            .iter()
            .find(|(known, _)| known.as_slice() == image)
            .map(|(_, text)| text.to_string())
            .unwrap_or_default())
    }
}

fn solving(answer: &'static str) -> Arc<dyn OcrEngine> {
    Arc::new(KnownImages(vec![(png("first"), answer)]))
}

fn config(server: &MockServer) -> RegistryConfig {
    RegistryConfig {
        origin: server.uri(),
        ..RegistryConfig::default()
    }
}

fn registry_client(server: &MockServer, engine: Arc<dyn OcrEngine>) -> RegistryClient {
    let config = Arc::new(config(server));
    let acquirer = SessionAcquirer::new(Arc::clone(&config), CaptchaSolver::new(engine)).unwrap();
    RegistryClient::new(config.endpoints(), acquirer)
}

async fn mount_captcha(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("{SESSION_COOKIE}; Path=/").as_str())
                .set_body_bytes(png("first")),
        )
        .mount(server)
        .await;
}

async fn mount_search_form(server: &MockServer, captcha: &str) {
    Mock::given(method("POST"))
        .and(path("/pretraga.htm"))
        .and(header("cookie", SESSION_COOKIE))
        .and(body_string_contains("napredna=1"))
        .and(body_string_contains(format!("kontrolniBroj={captcha}").as_str()))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/pretraga.htm"))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_listing(server: &MockServer, start: u64, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/pretraga.htm"))
        .and(header("cookie", SESSION_COOKIE))
        .and(body_string_contains(format!("iDisplayStart={start}&").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn one_row_listing(total: u64) -> serde_json::Value {
    json!({
        "sEcho": 1,
        "iTotalRecords": total,
        "iTotalDisplayRecords": total,
        "aaData": [["987", "exc1", 0, "12345678", "Example Trade", "active"]]
    })
}

const DETAIL_PAGE: &str = r#"<html><body>
<div class="detalj">
  <div class="detaljiParagraphTitle">Obrt - Sjedište</div>
  <table>
    <tr><td class="label">Naziv obrta:</td><td>EXAMPLE TRADE</td></tr>
    <tr><td class="label">MBO:</td><td>12345678</td></tr>
  </table>
  <a href="izvadak.htm?id=987">Izvadak</a>
</div>
<div class="detalj">
  <div class="detaljiParagraphTitle">Vlasnik</div>
  <table><tr><td class="label">OIB:</td><td>12345678901</td></tr></table>
</div>
</body></html>"#;

// ─────────────────────── listing ───────────────────────

#[tokio::test]
async fn test_search_maps_listing_rows() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    mount_listing(&server, 0, one_row_listing(1)).await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_id("12345678").unwrap();
    let listing = client.search(&criteria, 1).await.unwrap();

    assert_eq!(listing.total_results, 1);
    assert_eq!(listing.records.len(), 1);
    let record = &listing.records[0];
    assert_eq!(record.registry_id, "987");
    assert_eq!(record.excerpt_id, "exc1");
    assert_eq!(record.business_id, "12345678");
    assert_eq!(record.name, "Example Trade");
    assert_eq!(record.status, "active");
    assert_eq!(listing.session.captcha(), "4821");

    let requests = server.received_requests().await.unwrap();
    let listing_request = requests
        .iter()
        .find(|r| String::from_utf8_lossy(&r.body).contains("iDisplayStart"))
        .unwrap();
    assert_eq!(listing_request.url.query(), Some("izvrsiDohvat"));
    let form_request = requests
        .iter()
        .find(|r| String::from_utf8_lossy(&r.body).contains("napredna=1"))
        .unwrap();
    assert!(String::from_utf8_lossy(&form_request.body).contains("obrtMbo=12345678"));
}

#[tokio::test]
async fn test_search_total_accounts_for_page_offset() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    mount_listing(&server, 100, one_row_listing(30)).await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_name("Example").unwrap();
    let listing = client.search(&criteria, 2).await.unwrap();

    assert_eq!(listing.total_results, 130);
}

#[tokio::test]
async fn test_malformed_listing_is_upstream_unavailable() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    Mock::given(method("POST"))
        .and(path("/pretraga.htm"))
        .and(body_string_contains("iDisplayStart"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_id("12345678").unwrap();
    let err = client.search(&criteria, 1).await.unwrap_err();
    assert!(matches!(err, RegistryError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_empty_listing_body_is_upstream_unavailable() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    Mock::given(method("POST"))
        .and(path("/pretraga.htm"))
        .and(body_string_contains("iDisplayStart"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_id("12345678").unwrap();
    let err = client.search(&criteria, 1).await.unwrap_err();
    assert_eq!(err, RegistryError::UpstreamUnavailable("no response".to_string()));
}

#[tokio::test]
async fn test_oversized_listing_total_is_upstream_unavailable() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    mount_listing(
        &server,
        100,
        json!({ "iTotalDisplayRecords": u64::MAX, "aaData": [] }),
    )
    .await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_name("Example").unwrap();
    let err = client.search(&criteria, 2).await.unwrap_err();
    assert_eq!(
        err,
        RegistryError::UpstreamUnavailable("listing total out of range".to_string())
    );
}

#[tokio::test]
async fn test_registry_id_skips_listing() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    Mock::given(method("POST"))
        .and(path("/pretraga.htm"))
        .and(body_string_contains("iDisplayStart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(one_row_listing(1)))
        .expect(0)
        .mount(&server)
        .await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::registry_id("555").unwrap();
    let listing = client.search(&criteria, 1).await.unwrap();

    assert_eq!(listing.total_results, 1);
    assert_eq!(listing.records[0].registry_id, "555");
}

// ─────────────────────── captcha ───────────────────────

#[tokio::test]
async fn test_escalates_to_five_sequential_challenges() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("{SESSION_COOKIE}; Path=/").as_str())
                .set_body_bytes(png("unreadable")),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png("retry")))
        .expect(5)
        .mount(&server)
        .await;
    mount_search_form(&server, "7315").await;
    mount_listing(&server, 0, one_row_listing(1)).await;

    let engine: Arc<dyn OcrEngine> = Arc::new(KnownImages(vec![(png("retry"), "7315")]));
    let client = registry_client(&server, engine);
    let criteria = SearchCriteria::business_id("12345678").unwrap();
    let listing = client.search(&criteria, 1).await.unwrap();

    assert_eq!(listing.session.captcha(), "7315");
}

#[tokio::test]
async fn test_unsolvable_captcha_yields_no_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png("noise")))
        .expect(6)
        .mount(&server)
        .await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_id("12345678").unwrap();
    let err = client.search(&criteria, 1).await.unwrap_err();

    assert_eq!(err, RegistryError::NoSession("captcha unsolved".to_string()));
}

#[tokio::test]
async fn test_non_image_captcha_is_upstream_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = registry_client(&server, solving("4821"));
    let criteria = SearchCriteria::business_id("12345678").unwrap();
    let err = client.search(&criteria, 1).await.unwrap_err();
    assert!(matches!(err, RegistryError::UpstreamUnavailable(_)));
}

// ─────────────────────── service ───────────────────────

#[tokio::test]
async fn test_lookup_extracts_and_caches_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("{SESSION_COOKIE}; Path=/").as_str())
                .set_body_bytes(png("first")),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_search_form(&server, "4821").await;
    mount_listing(&server, 0, one_row_listing(1)).await;
    Mock::given(method("GET"))
        .and(path("/detalji.htm"))
        .and(query_param("id", "987"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let portor = Portor::with_engine(config(&server), solving("4821")).unwrap();
    let params = LookupParams {
        business_id: Some("12345678".into()),
        ..Default::default()
    };

    let detail = portor.lookup(&params).await.unwrap();
    assert_eq!(detail.fields["naziv_obrta"], "EXAMPLE TRADE");
    assert_eq!(
        detail.fields["url_izvatka"],
        format!("{}/izvadak.htm?id=987", server.uri())
    );
    assert_eq!(detail.owner.as_ref().unwrap()["oib"], "12345678901");
    assert!(detail.activities.is_none());

    let again = portor.lookup(&params).await.unwrap();
    assert_eq!(again, detail);
}

#[tokio::test]
async fn test_lookup_session_redirect_is_upstream_unavailable() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    mount_listing(&server, 0, one_row_listing(1)).await;
    Mock::given(method("GET"))
        .and(path("/detalji.htm"))
        .respond_with(ResponseTemplate::new(303).insert_header("location", "/pretraga.htm"))
        .mount(&server)
        .await;

    let portor = Portor::with_engine(config(&server), solving("4821")).unwrap();
    let params = LookupParams {
        vat_id: Some("12345678901".into()),
        ..Default::default()
    };
    let err = portor.lookup(&params).await.unwrap_err();
    assert!(matches!(err, RegistryError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_lookup_empty_listing_is_not_found() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    mount_listing(
        &server,
        0,
        json!({ "iTotalDisplayRecords": 0, "aaData": [] }),
    )
    .await;

    let portor = Portor::with_engine(config(&server), solving("4821")).unwrap();
    let params = LookupParams {
        business_id: Some("87654321".into()),
        ..Default::default()
    };
    let err = portor.lookup(&params).await.unwrap_err();
    assert!(matches!(err, RegistryError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_lookup_error_page_is_not_found() {
    let server = MockServer::start().await;
    mount_captcha(&server).await;
    mount_search_form(&server, "4821").await;
    Mock::given(method("GET"))
        .and(path("/detalji.htm"))
        .and(query_param("id", "555"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><div id="errorContent">Greška</div></body></html>"#),
        )
        .mount(&server)
        .await;

    let portor = Portor::with_engine(config(&server), solving("4821")).unwrap();
    let params = LookupParams {
        registry_id: Some("555".into()),
        ..Default::default()
    };
    let err = portor.lookup(&params).await.unwrap_err();
    assert!(matches!(err, RegistryError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_upstream() {
    let server = MockServer::start().await;

    let portor = Portor::with_engine(config(&server), solving("4821")).unwrap();
    let params = LookupParams {
        business_id: Some("1234".into()),
        ..Default::default()
    };
    let err = portor.lookup(&params).await.unwrap_err();
    assert_eq!(err, RegistryError::validation("id", "Must be 8 digits"));

    let err = portor.search("Example", 0).await.unwrap_err();
    assert!(matches!(err, RegistryError::Validation { .. }));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_page_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/captcha/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("{SESSION_COOKIE}; Path=/").as_str())
                .set_body_bytes(png("first")),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_search_form(&server, "4821").await;
    mount_listing(&server, 0, one_row_listing(1)).await;

    let portor = Portor::with_engine(config(&server), solving("4821")).unwrap();
    let page = portor.search("Example Trade", 1).await.unwrap();
    assert_eq!(page.total_results, 1);
    assert_eq!(page.page_size, 100);
    assert_eq!(page.data[0].name, "Example Trade");

    let cached = portor.search(" Example Trade ", 1).await.unwrap();
    assert_eq!(cached, page);
}
