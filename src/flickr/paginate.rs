use serde_json::Value;

use super::types::value_to_u64;
use crate::api::error::ApiError;
use crate::api::ResilientApiClient;

/// Largest page size the list methods accept.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// A paginated list method and where its items live in the response:
/// `{<container>: {<item>: [...], "page": N, "pages": M}}`.
#[derive(Debug, Clone, Copy)]
pub struct ListMethod {
    pub method: &'static str,
    pub container: &'static str,
    pub item: &'static str,
}

pub const PEOPLE_GET_PHOTOS: ListMethod = ListMethod {
    method: "flickr.people.getPhotos",
    container: "photos",
    item: "photo",
};

pub const PHOTOSETS_GET_LIST: ListMethod = ListMethod {
    method: "flickr.photosets.getList",
    container: "photosets",
    item: "photoset",
};

pub const PHOTOSETS_GET_PHOTOS: ListMethod = ListMethod {
    method: "flickr.photosets.getPhotos",
    container: "photoset",
    item: "photo",
};

/// Fetch every page of `list` and return the items in server order.
///
/// Starts at page 1 and keeps going while `page <= pages`, re-reading the
/// `pages` bound from every response. A collection reporting zero pages costs
/// exactly one call. Any failed page aborts the whole enumeration.
pub async fn collect_all(
    client: &ResilientApiClient,
    list: &ListMethod,
    fixed_params: &[(String, String)],
    page_size: u32,
) -> Result<Vec<Value>, ApiError> {
    let mut items = Vec::new();
    let mut page: u64 = 1;

    loop {
        let mut params = fixed_params.to_vec();
        params.push(("page".to_string(), page.to_string()));
        params.push(("per_page".to_string(), page_size.to_string()));

        let response = client.call(list.method, &params).await?;
        let container = response.get(list.container).ok_or_else(|| {
            ApiError::protocol(format!(
                "{} response has no '{}' object",
                list.method, list.container
            ))
        })?;

        let pages = container
            .get("pages")
            .and_then(value_to_u64)
            .unwrap_or(page);
        if let Some(batch) = container.get(list.item).and_then(Value::as_array) {
            items.extend(batch.iter().cloned());
        }
        tracing::debug!(
            method = list.method,
            page,
            pages,
            total = items.len(),
            "Fetched page"
        );

        page += 1;
        if page > pages {
            break;
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{param, FakeSession};
    use crate::retry::RetryConfig;
    use serde_json::json;

    fn client_with(fake: &FakeSession) -> ResilientApiClient {
        let mut client = ResilientApiClient::new(RetryConfig {
            max_retries: 1,
            delay_secs: 0,
        });
        client.bind(Box::new(fake.clone()));
        client
    }

    fn page(ids: &[&str], page: u64, pages: u64) -> Value {
        let photos: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        json!({"stat": "ok", "photos": {"page": page, "pages": pages, "photo": photos}})
    }

    fn ids(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_three_pages_in_three_calls() {
        let fake = FakeSession::new();
        fake.push_json(200, page(&["A", "B"], 1, 3));
        fake.push_json(200, page(&["C", "D"], 2, 3));
        fake.push_json(200, page(&["E"], 3, 3));
        let client = client_with(&fake);

        let items = collect_all(&client, &PEOPLE_GET_PHOTOS, &[], 2).await.unwrap();
        assert_eq!(ids(&items), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(fake.call_count(), 3);

        let calls = fake.calls.lock().unwrap();
        assert_eq!(param(&calls[0], "page"), Some("1"));
        assert_eq!(param(&calls[2], "page"), Some("3"));
        assert_eq!(param(&calls[1], "per_page"), Some("2"));
    }

    #[tokio::test]
    async fn test_empty_collection_single_call() {
        let fake = FakeSession::new();
        fake.push_json(200, page(&[], 1, 0));
        let client = client_with(&fake);

        let items = collect_all(&client, &PEOPLE_GET_PHOTOS, &[], 500).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_pages_as_string_and_shrinking_bound() {
        let fake = FakeSession::new();
        fake.push_json(
            200,
            json!({"stat": "ok", "photoset": {"page": "1", "pages": "4", "photo": [{"id": "A"}]}}),
        );
        // The collection shrank between calls; the latest bound wins.
        fake.push_json(
            200,
            json!({"stat": "ok", "photoset": {"page": "2", "pages": "2", "photo": [{"id": "B"}]}}),
        );
        let client = client_with(&fake);

        let fixed = vec![("photoset_id".to_string(), "721".to_string())];
        let items = collect_all(&client, &PHOTOSETS_GET_PHOTOS, &fixed, 500)
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["A", "B"]);
        assert_eq!(fake.call_count(), 2);
        let calls = fake.calls.lock().unwrap();
        assert_eq!(param(&calls[1], "photoset_id"), Some("721"));
        assert_eq!(
            param(&calls[1], "method"),
            Some("flickr.photosets.getPhotos")
        );
    }

    #[tokio::test]
    async fn test_missing_pages_stops_after_one() {
        let fake = FakeSession::new();
        fake.push_json(200, json!({"stat": "ok", "photosets": {"photoset": [{"id": "1"}]}}));
        let client = client_with(&fake);

        let items = collect_all(&client, &PHOTOSETS_GET_LIST, &[], 500).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_container_is_protocol_error() {
        let fake = FakeSession::new();
        fake.push_json(200, json!({"stat": "ok"}));
        fake.push_json(200, json!({"stat": "ok"}));
        let client = client_with(&fake);

        let err = collect_all(&client, &PEOPLE_GET_PHOTOS, &[], 500)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::api::error::ApiErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_rate_limit_mid_enumeration_stops() {
        let fake = FakeSession::new();
        fake.push_json(200, page(&["A"], 1, 3));
        fake.push_json(429, json!({}));
        let client = client_with(&fake);

        let err = collect_all(&client, &PEOPLE_GET_PHOTOS, &[], 1)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(fake.call_count(), 2);
    }
}
