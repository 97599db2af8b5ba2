//! Rule-driven extraction of a registry detail page into a [`TenantDetail`].
//!
//! A detail page is a sequence of sections, each introduced by a
//! `.detaljiParagraphTitle` element whose parent holds label/value table
//! rows. [`SECTION_RULES`] says which sections matter and how to read them;
//! the extractor itself knows nothing about specific fields.
//!
//! Extraction is synchronous because `scraper::Html` is `!Send`. Parse and
//! extract in one call and never hold the document across an `.await`.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

use crate::types::{Record, RegistryError, RegistryResult, TenantDetail};

/// Present only on the registry's "record does not exist" page.
const ERROR_MARKER: &str = "#errorContent";
const SECTION_TITLE: &str = ".detaljiParagraphTitle";
const ROW: &str = "tr";

/// Output key of the business section (merged at the top level).
pub const BUSINESS_SECTION: &str = "obrt";
/// Output key of the owner section.
pub const OWNER_SECTION: &str = "vlasnik";
/// Output key of the activity list.
pub const ACTIVITY_SECTION: &str = "djelatnosti";

/// How to read one document section.
#[derive(Debug, Clone, Copy)]
pub struct SectionRule {
    /// Section title as printed by the registry; matched after
    /// [`normalize_key`] on both sides.
    pub title: &'static str,
    /// Output key for the section.
    pub key: &'static str,
    /// Extraction fails with `MalformedDocument` when a required section is
    /// absent.
    pub required: bool,
    pub kind: SectionKind,
}

#[derive(Debug, Clone, Copy)]
pub enum SectionKind {
    /// One record of label/value pairs, optionally extended with values read
    /// from elsewhere in the document.
    Scalar { computed: &'static [ComputedField] },
    /// Label/value pairs sliced into records of `arity` fields each.
    Group {
        arity: usize,
        transforms: &'static [(&'static str, ValueTransform)],
    },
}

/// Rewrites a single field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTransform {
    /// Keep only the text before the first occurrence of the separator.
    BeforeSeparator(&'static str),
}

impl ValueTransform {
    pub fn apply(self, value: &str) -> String {
        match self {
            ValueTransform::BeforeSeparator(separator) => match value.find(separator) {
                Some(idx) => value[..idx].to_string(),
                None => value.to_string(),
            },
        }
    }
}

/// A field derived from the document rather than read from section rows.
#[derive(Debug, Clone, Copy)]
pub enum ComputedField {
    /// Text of the first cell matching `selector` that contains `contains`,
    /// cut before `separator`.
    CellPrefix {
        key: &'static str,
        selector: &'static str,
        contains: &'static str,
        separator: &'static str,
    },
    /// Registry origin joined with the `href` of the first anchor matching
    /// `selector`.
    LinkTarget {
        key: &'static str,
        selector: &'static str,
    },
}

/// Sections of the registry detail page.
pub static SECTION_RULES: &[SectionRule] = &[
    SectionRule {
        title: "obrt - sjedište",
        key: BUSINESS_SECTION,
        required: true,
        kind: SectionKind::Scalar {
            computed: &[
                ComputedField::CellPrefix {
                    key: "pretezita_djelatnost",
                    selector: ".detalj td:not(.label)",
                    contains: "pretežita",
                    separator: " - ",
                },
                ComputedField::LinkTarget {
                    key: "url_izvatka",
                    selector: "a[href^=\"izvadak.htm\"]",
                },
            ],
        },
    },
    SectionRule {
        title: "djelatnosti sjedišta",
        key: ACTIVITY_SECTION,
        required: false,
        kind: SectionKind::Group {
            arity: 4,
            transforms: &[("djelatnost", ValueTransform::BeforeSeparator(" - "))],
        },
    },
    SectionRule {
        title: "vlasnik",
        key: OWNER_SECTION,
        required: false,
        kind: SectionKind::Scalar { computed: &[] },
    },
];

/// Normalize a label or title into a record key.
///
/// Lower-cases, trims, drops `/ - : .`, turns whitespace runs into `_` and
/// transliterates Croatian diacritics (`č ć` → `c`, `š` → `s`, `đ` → `dj`,
/// `ž` → `z`). Idempotent.
pub fn normalize_key(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut key = String::with_capacity(lowered.len());
    let mut in_whitespace = false;

    for c in lowered
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | ':' | '.'))
    {
        if c.is_whitespace() {
            if !in_whitespace {
                key.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        match c {
            'č' | 'ć' => key.push('c'),
            'š' => key.push('s'),
            'đ' => key.push_str("dj"),
            'ž' => key.push('z'),
            other => key.push(other),
        }
    }

    key
}

enum SectionValue {
    Scalar(Record),
    Group(Vec<Record>),
}

/// Applies a rule table to registry detail pages.
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    origin: String,
    rules: &'static [SectionRule],
}

impl DocumentExtractor {
    /// Extractor over [`SECTION_RULES`]; `origin` prefixes computed links.
    pub fn new(origin: &str) -> Self {
        Self::with_rules(origin, SECTION_RULES)
    }

    pub fn with_rules(origin: &str, rules: &'static [SectionRule]) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            rules,
        }
    }

    pub fn extract(&self, html: &str) -> RegistryResult<TenantDetail> {
        let document = Html::parse_document(html);

        if document.select(&selector(ERROR_MARKER)?).next().is_some() {
            return Err(RegistryError::RecordNotFound(
                "sole proprietorship does not exist".to_string(),
            ));
        }

        let title_selector = selector(SECTION_TITLE)?;
        let row_selector = selector(ROW)?;
        let rule_titles: Vec<String> = self.rules.iter().map(|r| normalize_key(r.title)).collect();

        let mut sections: HashMap<&'static str, SectionValue> = HashMap::new();

        for title in document.select(&title_selector) {
            let title_key = normalize_key(&text_of(title));
            let Some(rule) = rule_titles
                .iter()
                .position(|t| *t == title_key)
                .map(|i| &self.rules[i])
            else {
                continue;
            };
            let Some(container) = title.parent().and_then(ElementRef::wrap) else {
                continue;
            };

            let pairs = label_value_pairs(container, &row_selector);
            let value = match rule.kind {
                SectionKind::Scalar { computed } => {
                    let mut record: Record = pairs.into_iter().collect();
                    for field in computed {
                        self.apply_computed(&document, field, &mut record)?;
                    }
                    SectionValue::Scalar(record)
                }
                SectionKind::Group { arity, transforms } => {
                    SectionValue::Group(group_pairs(rule.key, pairs, arity, transforms)?)
                }
            };
            sections.insert(rule.key, value);
        }

        if let Some(missing) = self
            .rules
            .iter()
            .find(|r| r.required && !sections.contains_key(r.key))
        {
            return Err(RegistryError::MalformedDocument(format!(
                "section {:?} not found",
                missing.title
            )));
        }

        let mut detail = TenantDetail::default();
        for (key, value) in sections {
            match (key, value) {
                (BUSINESS_SECTION, SectionValue::Scalar(record)) => detail.fields = record,
                (OWNER_SECTION, SectionValue::Scalar(record)) => detail.owner = Some(record),
                (ACTIVITY_SECTION, SectionValue::Group(records)) => {
                    detail.activities = Some(records)
                }
                (other, _) => tracing::debug!("Section {other} has no place in the record"),
            }
        }

        Ok(detail)
    }

    fn apply_computed(
        &self,
        document: &Html,
        field: &ComputedField,
        record: &mut Record,
    ) -> RegistryResult<()> {
        match *field {
            ComputedField::CellPrefix {
                key,
                selector: css,
                contains,
                separator,
            } => {
                let found = document
                    .select(&selector(css)?)
                    .map(text_of)
                    .find(|text| text.contains(contains));
                match found {
                    Some(text) => {
                        let prefix = ValueTransform::BeforeSeparator(separator).apply(&text);
                        record.insert(key.to_string(), prefix.trim().to_string());
                    }
                    None => tracing::debug!("No cell for computed field {key}"),
                }
            }
            ComputedField::LinkTarget { key, selector: css } => {
                let href = document
                    .select(&selector(css)?)
                    .find_map(|a| a.value().attr("href"));
                match href {
                    Some(href) => {
                        record.insert(key.to_string(), format!("{}/{href}", self.origin));
                    }
                    None => tracing::debug!("No link for computed field {key}"),
                }
            }
        }
        Ok(())
    }
}

fn selector(css: &str) -> RegistryResult<Selector> {
    Selector::parse(css)
        .map_err(|e| RegistryError::MalformedDocument(format!("invalid selector {css:?}: {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Flatten the container's even-width rows into normalized (key, value)
/// pairs, in document order. Pairs with an empty label or value are dropped;
/// a value of `-` becomes empty.
fn label_value_pairs(container: ElementRef<'_>, rows: &Selector) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for row in container.select(rows) {
        let cells: Vec<ElementRef<'_>> = row.children().filter_map(ElementRef::wrap).collect();
        if cells.len() % 2 != 0 {
            continue;
        }
        for cell in cells.chunks(2) {
            let label = text_of(cell[0]);
            let value = text_of(cell[1]).trim().to_string();
            if label.trim().is_empty() || value.is_empty() {
                continue;
            }
            let value = if value == "-" { String::new() } else { value };
            pairs.push((normalize_key(&label), value));
        }
    }

    pairs
}

fn group_pairs(
    section: &str,
    pairs: Vec<(String, String)>,
    arity: usize,
    transforms: &[(&'static str, ValueTransform)],
) -> RegistryResult<Vec<Record>> {
    if arity == 0 || pairs.len() % arity != 0 {
        return Err(RegistryError::MalformedDocument(format!(
            "section {section} has {} field(s), not a multiple of {arity}",
            pairs.len()
        )));
    }

    Ok(pairs
        .chunks(arity)
        .map(|group| {
            group
                .iter()
                .map(|(key, value)| {
                    let transform = transforms
                        .iter()
                        .find(|(k, _)| *k == key.as_str())
                        .map(|(_, t)| *t);
                    let value = match transform {
                        Some(t) if !value.is_empty() => t.apply(value),
                        _ => value.clone(),
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .collect())
}
