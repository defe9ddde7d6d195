//! School-scoped CRM record routes
//!
//! Enquiries are CRM leads, applications are CRM contacts. Every query is
//! pinned to the caller's school through a `(School:equals:<id>)` term; the
//! school id arrives in the `x-school-id` header set by the session layer.

use std::collections::HashMap;

use axum::http::HeaderMap;
use crm_gateway::Gateway;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::criteria::Criteria;
use crate::error::ApiError;

pub const SCHOOL_ID_HEADER: &str = "x-school-id";

/// How a list route maps onto a CRM search.
#[derive(Debug)]
pub struct ListRoute {
    pub search_path: &'static str,
    pub default_per_page: u32,
    /// Request filter key → CRM field.
    pub filters: &'static [(&'static str, &'static str)],
    /// Fields matched with `starts_with` by the free-text search.
    pub search_fields: &'static [&'static str],
}

pub const ENQUIRIES: ListRoute = ListRoute {
    search_path: "Leads/search",
    default_per_page: 200,
    filters: &[
        ("status", "Lead_Status"),
        ("gender", "Gender"),
        ("yearLevel", "School_Year_Level"),
    ],
    search_fields: &["Full_Name", "Email", "Phone"],
};

pub const APPLICATIONS: ListRoute = ListRoute {
    search_path: "Contacts/search",
    default_per_page: 50,
    filters: &[
        ("program", "Programs_Interested_In"),
        ("status", "Contact_Status"),
        ("matchingStatus", "Matching_Status"),
    ],
    search_fields: &["Full_Name"],
};

/// The CRM caps search pages at 200 records.
const MAX_PER_PAGE: u32 = 200;

/// List request body. Every field is optional; an empty body lists page 1.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    #[serde(default)]
    pub filters: HashMap<String, Value>,
    pub search: Option<String>,
}

impl ListRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
    }

    /// Filter value as criteria text. Strings and numbers are accepted.
    fn filter(&self, key: &str) -> Option<String> {
        match self.filters.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Read and validate the caller's school id.
pub fn school_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let id = headers
        .get(SCHOOL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingSchoolId)?;
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::BadRequest("malformed school ID".into()));
    }
    Ok(id.to_string())
}

/// Search one CRM module for the caller's school and paginate the result.
pub async fn list(
    gateway: &Gateway,
    route: &ListRoute,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Value, ApiError> {
    let school = school_id(headers)?;
    let request = ListRequest::parse(body)?;

    let page = request.page.unwrap_or(1);
    let per_page = request.per_page.unwrap_or(route.default_per_page);
    if page == 0 {
        return Err(ApiError::BadRequest("page must be at least 1".into()));
    }
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(ApiError::BadRequest(format!(
            "perPage must be between 1 and {MAX_PER_PAGE}"
        )));
    }

    let criteria = route
        .filters
        .iter()
        .fold(Criteria::new().equals("School", &school), |c, (key, field)| {
            c.equals_opt(field, request.filter(key).as_deref())
        })
        .starts_with_any(route.search_fields, request.search.as_deref())
        .build();
    debug!(path = route.search_path, %criteria, page, per_page, "searching CRM");

    let page_str = page.to_string();
    let per_page_str = per_page.to_string();
    let body = gateway
        .request_with_query(
            Method::GET,
            route.search_path,
            &[
                ("criteria", criteria.as_str()),
                ("page", page_str.as_str()),
                ("per_page", per_page_str.as_str()),
            ],
            None,
        )
        .await?;

    Ok(paginate(body, page, per_page))
}

/// Shape a CRM search response into `{data, pagination}`.
///
/// `totalPages` is at least 1. `count` falls back to the number of records
/// returned when the CRM omits `info.count`.
pub fn paginate(body: Value, page: u32, per_page: u32) -> Value {
    let data = match body.get("data") {
        Some(Value::Array(records)) => Value::Array(records.clone()),
        _ => Value::Array(Vec::new()),
    };
    let info = body.get("info");
    let reported = info.and_then(|i| i.get("count")).and_then(Value::as_u64);
    let more_records = info
        .and_then(|i| i.get("more_records"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let count = reported.unwrap_or_else(|| data.as_array().map_or(0, |d| d.len() as u64));
    let total_pages = reported
        .map(|c| c.div_ceil(u64::from(per_page)))
        .filter(|&t| t > 0)
        .unwrap_or(1);

    json!({
        "data": data,
        "pagination": {
            "currentPage": page,
            "perPage": per_page,
            "totalPages": total_pages,
            "moreRecords": more_records,
            "count": count,
        }
    })
}

/// Fetch the caller's school record.
pub async fn school(gateway: &Gateway, headers: &HeaderMap) -> Result<Value, ApiError> {
    let school = school_id(headers)?;
    let body = gateway
        .request(Method::GET, &format!("Schools1/{school}"), None)
        .await?;
    let record = body
        .get("data")
        .and_then(|d| d.get(0))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(json!({ "data": record }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SCHOOL_ID_HEADER, id.parse().unwrap());
        headers
    }

    #[test]
    fn school_id_required() {
        assert!(matches!(
            school_id(&HeaderMap::new()),
            Err(ApiError::MissingSchoolId)
        ));
        assert!(matches!(
            school_id(&headers_with("  ")),
            Err(ApiError::MissingSchoolId)
        ));
    }

    #[test]
    fn school_id_rejects_path_characters() {
        assert!(matches!(
            school_id(&headers_with("42/../Users")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn school_id_trimmed() {
        assert_eq!(school_id(&headers_with(" 4200000012 ")).unwrap(), "4200000012");
    }

    #[test]
    fn empty_body_is_default_request() {
        let request = ListRequest::parse(b"").unwrap();
        assert!(request.page.is_none());
        assert!(request.filters.is_empty());
    }

    #[test]
    fn body_fields_are_camel_case() {
        let request = ListRequest::parse(
            br#"{"page":2,"perPage":25,"filters":{"yearLevel":"Year 7","status":null},"search":"ada"}"#,
        )
        .unwrap();
        assert_eq!(request.page, Some(2));
        assert_eq!(request.per_page, Some(25));
        assert_eq!(request.filter("yearLevel").as_deref(), Some("Year 7"));
        assert_eq!(request.filter("status"), None);
        assert_eq!(request.search.as_deref(), Some("ada"));
    }

    #[test]
    fn numeric_filter_is_accepted() {
        let request = ListRequest::parse(br#"{"filters":{"yearLevel":7}}"#).unwrap();
        assert_eq!(request.filter("yearLevel").as_deref(), Some("7"));
    }

    #[test]
    fn malformed_body_is_bad_request() {
        assert!(matches!(
            ListRequest::parse(b"{not json"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn paginate_uses_reported_count() {
        let body = json!({
            "data": [{"id": "1"}, {"id": "2"}],
            "info": {"count": 401, "more_records": true}
        });
        let page = paginate(body, 1, 200);
        assert_eq!(page["data"].as_array().unwrap().len(), 2);
        assert_eq!(page["pagination"]["currentPage"], 1);
        assert_eq!(page["pagination"]["perPage"], 200);
        assert_eq!(page["pagination"]["totalPages"], 3);
        assert_eq!(page["pagination"]["moreRecords"], true);
        assert_eq!(page["pagination"]["count"], 401);
    }

    #[test]
    fn paginate_falls_back_to_record_count() {
        let body = json!({"data": [{"id": "1"}, {"id": "2"}, {"id": "3"}]});
        let page = paginate(body, 1, 50);
        assert_eq!(page["pagination"]["count"], 3);
        assert_eq!(page["pagination"]["totalPages"], 1);
        assert_eq!(page["pagination"]["moreRecords"], false);
    }

    #[test]
    fn paginate_no_content() {
        let page = paginate(Value::Null, 1, 200);
        assert_eq!(page["data"], json!([]));
        assert_eq!(page["pagination"]["count"], 0);
        assert_eq!(page["pagination"]["totalPages"], 1);
    }

    #[test]
    fn paginate_zero_count_is_one_page() {
        let page = paginate(json!({"data": [], "info": {"count": 0}}), 1, 50);
        assert_eq!(page["pagination"]["totalPages"], 1);
    }
}
