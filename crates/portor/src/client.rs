//! Registry client: advanced-search submission and the paginated listing.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Endpoints;
use crate::criteria::SearchCriteria;
use crate::session::{SessionAcquirer, SessionHandle};
use crate::types::{ListingResult, RegistryError, RegistryResult, SummaryRecord};

/// Rows per listing page. The registry accepts any size; this one is fixed.
pub const PAGE_SIZE: u32 = 100;

/// Columns per listing row.
const LISTING_COLUMNS: usize = 6;

/// Advanced-search form fields that never vary.
///
/// Every filter has to be present for the registry to accept the form;
/// the status checkboxes are all ticked so records in any state match.
const SEARCH_FORM_DEFAULTS: &[(&str, &str)] = &[
    ("napredna", "1"),
    ("obrtObavljanje", ""),
    ("obrtVrsta", ""),
    ("obrtBrojObrtnice", ""),
    ("obrtTduId", ""),
    ("obrtBrRegUloska", ""),
    ("obrtStanjeURadu", "true"),
    ("_obrtStanjeURadu", "on"),
    ("obrtStanjePrivObust", "true"),
    ("_obrtStanjePrivObust", "on"),
    ("obrtStanjeMirovanje", "true"),
    ("_obrtStanjeMirovanje", "on"),
    ("obrtStanjeBezPocetka", "true"),
    ("_obrtStanjeBezPocetka", "on"),
    ("obrtStanjeOdjava", "true"),
    ("_obrtStanjeOdjava", "on"),
    ("obrtStanjePreseljen", "true"),
    ("_obrtStanjePreseljen", "on"),
    ("obrtUlica", ""),
    ("obrtKucniBroj", ""),
    ("obrtNaseljeId", ""),
    ("obrtOpcinaIliGradId", ""),
    ("obrtZupanijaId", ""),
    ("obrtEmail", ""),
    ("obrtWwwAdresa", ""),
    ("vlasnikImePrezime", ""),
    ("_pretraziVlasnikaUPasivi", "on"),
    ("vlasnikUlica", ""),
    ("vlasnikKucniBroj", ""),
    ("vlasnikNaseljeId", ""),
    ("vlasnikOpcinaIliGradId", ""),
    ("vlasnikZupanijaId", ""),
    ("pogonNaziv", ""),
    ("pogonStanjeURadu", "true"),
    ("_pogonStanjeURadu", "on"),
    ("pogonStanjePrivObust", "true"),
    ("_pogonStanjePrivObust", "on"),
    ("pogonStanjeBezPocetka", "true"),
    ("_pogonStanjeBezPocetka", "on"),
    ("pogonObavljanje", ""),
    ("pogonUlica", ""),
    ("pogonKucniBroj", ""),
    ("pogonNaseljeId", ""),
    ("pogonOpcinaIliGradId", ""),
    ("pogonZupanijaId", ""),
    ("pogonEmail", ""),
    ("pogonWwwAdresa", ""),
    ("_djelatnostIdLista", "1"),
    ("_pretezitaDjelatnost", "on"),
    ("trazi", "Traži"),
];

/// Listing query fields that never vary (DataTables server-side protocol).
const LISTING_DEFAULTS: &[(&str, &str)] = &[
    ("sEcho", "1"),
    ("iColumns", "6"),
    ("sColumns", ""),
    ("mDataProp_0", "0"),
    ("mDataProp_1", "1"),
    ("mDataProp_2", "2"),
    ("mDataProp_3", "3"),
    ("mDataProp_4", "4"),
    ("mDataProp_5", "5"),
    ("iSortingCols", "1"),
    ("iSortCol_0", "0"),
    ("sSortDir_0", "asc"),
    ("bSortable_0", "true"),
    ("bSortable_1", "true"),
    ("bSortable_2", "false"),
    ("bSortable_3", "false"),
    ("bSortable_4", "false"),
    ("bSortable_5", "false"),
    ("iRecordsTotal", "0"),
    ("sortKolona", "nazivPogona"),
    ("sortSmjer", "asc"),
];

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(rename = "aaData")]
    rows: Vec<Vec<Value>>,
    #[serde(rename = "iTotalDisplayRecords")]
    total_display_records: Value,
}

/// Talks to the registry's search endpoints on behalf of one lookup.
#[derive(Clone)]
pub struct RegistryClient {
    endpoints: Endpoints,
    acquirer: SessionAcquirer,
}

impl RegistryClient {
    pub fn new(endpoints: Endpoints, acquirer: SessionAcquirer) -> Self {
        Self {
            endpoints,
            acquirer,
        }
    }

    /// Run one search and return the requested page of results.
    ///
    /// With [`SearchCriteria::RegistryId`] the listing query is skipped and a
    /// single-row listing of that id is returned; the detail fetch that
    /// follows is what validates it.
    pub async fn search(&self, criteria: &SearchCriteria, page: u32) -> RegistryResult<ListingResult> {
        if page == 0 {
            return Err(RegistryError::validation("page", "Must be 1 or greater"));
        }

        let session = self.acquirer.acquire().await?;
        self.submit_search_form(&session, criteria).await?;

        if let SearchCriteria::RegistryId(registry_id) = criteria {
            tracing::debug!("Registry id {registry_id} given, skipping listing");
            let record = SummaryRecord {
                registry_id: registry_id.clone(),
                excerpt_id: String::new(),
                business_id: String::new(),
                name: String::new(),
                status: String::new(),
            };
            return Ok(ListingResult {
                records: vec![record],
                total_results: 1,
                session,
            });
        }

        let response = self.query_listing(&session, page).await?;
        let records = response
            .rows
            .iter()
            .map(|row| summary_from_row(row))
            .collect::<RegistryResult<Vec<_>>>()?;
        let page_total = count_value(&response.total_display_records).ok_or_else(|| {
            RegistryError::UpstreamUnavailable("listing total is not a number".to_string())
        })?;

        let total_results = page_offset(page).checked_add(page_total).ok_or_else(|| {
            RegistryError::UpstreamUnavailable("listing total out of range".to_string())
        })?;
        tracing::debug!(
            "Listing page {page}: {} row(s), {total_results} total",
            records.len()
        );

        Ok(ListingResult {
            records,
            total_results,
            session,
        })
    }

    /// Fetch the raw detail page of one record with an existing session.
    pub async fn fetch_detail(&self, session: &SessionHandle, registry_id: &str) -> RegistryResult<String> {
        let response = session
            .client()
            .get(self.endpoints.detail(registry_id))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::SEE_OTHER {
            return Err(RegistryError::UpstreamUnavailable(
                "session invalidated by registry".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(RegistryError::UpstreamUnavailable(format!(
                "detail page answered {status}"
            )));
        }

        Ok(response.text().await?)
    }

    async fn submit_search_form(
        &self,
        session: &SessionHandle,
        criteria: &SearchCriteria,
    ) -> RegistryResult<()> {
        let form = search_form(criteria, session.captcha());
        let response = session
            .client()
            .post(self.endpoints.search_form())
            .form(&form)
            .send()
            .await?;

        // The registry redirects after a successful submission; only hard
        // failures matter here.
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(RegistryError::UpstreamUnavailable(format!(
                "search form answered {status}"
            )));
        }
        Ok(())
    }

    async fn query_listing(&self, session: &SessionHandle, page: u32) -> RegistryResult<ListingResponse> {
        let form = listing_form(page);
        let response = session
            .client()
            .post(self.endpoints.listing())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::UpstreamUnavailable(format!(
                "listing answered {status}"
            )));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(RegistryError::UpstreamUnavailable("no response".to_string()));
        }
        serde_json::from_slice(&body)
            .map_err(|e| RegistryError::UpstreamUnavailable(format!("malformed listing: {e}")))
    }
}

/// Row offset of the first record on `page` (1-based).
pub fn page_offset(page: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(PAGE_SIZE)
}

/// Full advanced-search form for `criteria`, with `captcha` as control number.
pub fn search_form(criteria: &SearchCriteria, captcha: &str) -> Vec<(&'static str, String)> {
    let (name, business_id, vat_id) = match criteria {
        SearchCriteria::BusinessName(name) => (name.as_str(), "", ""),
        SearchCriteria::BusinessId(id) => ("", id.as_str(), ""),
        SearchCriteria::OwnerVatId(vat_id) => ("", "", vat_id.as_str()),
        SearchCriteria::RegistryId(_) => ("", "", ""),
    };

    let mut form: Vec<(&'static str, String)> = SEARCH_FORM_DEFAULTS
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    form.push(("obrtNaziv", name.to_string()));
    form.push(("obrtMbo", business_id.to_string()));
    form.push(("vlasnikOib", vat_id.to_string()));
    form.push(("kontrolniBroj", captcha.to_string()));
    form
}

/// Listing query for `page` (1-based).
pub fn listing_form(page: u32) -> Vec<(&'static str, String)> {
    let mut form: Vec<(&'static str, String)> = LISTING_DEFAULTS
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    form.push(("iDisplayStart", page_offset(page).to_string()));
    form.push(("iDisplayLength", PAGE_SIZE.to_string()));
    form
}

/// Map a 6-column listing row. Column 2 carries nothing we use.
fn summary_from_row(row: &[Value]) -> RegistryResult<SummaryRecord> {
    if row.len() < LISTING_COLUMNS {
        return Err(RegistryError::UpstreamUnavailable(format!(
            "listing row has {} column(s), expected {LISTING_COLUMNS}",
            row.len()
        )));
    }
    Ok(SummaryRecord {
        registry_id: cell_text(&row[0]),
        excerpt_id: cell_text(&row[1]),
        business_id: cell_text(&row[3]),
        name: cell_text(&row[4]),
        status: cell_text(&row[5]),
    })
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
