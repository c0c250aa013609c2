//! Paging and next-link tests
//!
//! Sets are always ordered by a unique key in the end, so next links use a
//! `$skipFilter` continuation that stays stable when rows are inserted in
//! front of the cursor.

use sta::prelude::*;

async fn host_with_things(names: &[&str]) -> Arc<ServerHost> {
    let host = Arc::new(ServerBuilder::new().build_host().unwrap());
    for name in names {
        let response = Service::new(host.clone())
            .execute(
                ServiceRequest::new(RequestType::Create, Version::V1_1, "/Things").with_content(
                    json!({"name": name, "description": "thing"}).to_string(),
                ),
            )
            .await;
        assert_eq!(response.code, 201);
    }
    host
}

async fn read(host: &Arc<ServerHost>, query: &str) -> Value {
    let response = Service::new(host.clone())
        .execute(ServiceRequest::new(RequestType::Read, Version::V1_1, "/Things").with_query(query))
        .await;
    assert_eq!(response.code, 200, "{:?}", response.body);
    response.body.unwrap()
}

fn names(body: &Value) -> Vec<String> {
    body["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

/// Query part of a next link
fn next_query(body: &Value) -> Option<String> {
    let link = body.get("@iot.nextLink")?.as_str()?;
    let (base, query) = link.split_once('?')?;
    assert_eq!(base, "http://localhost:8080/v1.1/Things");
    Some(query.to_string())
}

#[tokio::test]
async fn test_next_link_uses_skip_filter() {
    let host = host_with_things(&["a", "b", "c", "d", "e"]).await;

    let body = read(&host, "$top=2").await;
    assert_eq!(names(&body), vec!["a", "b"]);
    let query = next_query(&body).expect("first page has a next link");
    assert!(query.contains("$top=2"));
    assert!(query.contains("$skipFilter="));
    assert!(!query.contains("$skip="));

    let body = read(&host, &query).await;
    assert_eq!(names(&body), vec!["c", "d"]);

    let body = read(&host, &next_query(&body).unwrap()).await;
    assert_eq!(names(&body), vec!["e"]);
    assert!(body.get("@iot.nextLink").is_none());
}

#[tokio::test]
async fn test_next_link_survives_concurrent_insert() {
    let host = host_with_things(&["a", "b", "c"]).await;
    let body = read(&host, "$top=2&$orderby=name desc").await;
    assert_eq!(names(&body), vec!["c", "b"]);
    let query = next_query(&body).unwrap();

    // sorts before the cursor, must not shift the next page
    Service::new(host.clone())
        .execute(
            ServiceRequest::new(RequestType::Create, Version::V1_1, "/Things")
                .with_content(json!({"name": "z", "description": "thing"}).to_string()),
        )
        .await;

    let body = read(&host, &query).await;
    assert_eq!(names(&body), vec!["a"]);
}

#[tokio::test]
async fn test_next_link_keeps_other_options() {
    let host = host_with_things(&["a", "b", "c"]).await;
    let body = read(&host, "$top=1&$filter=name ne 'b'&$count=true").await;
    assert_eq!(body["@iot.count"], json!(2));
    let query = next_query(&body).unwrap();
    assert!(query.contains("$filter="));
    assert!(query.contains("$count=true"));

    let body = read(&host, &query).await;
    assert_eq!(names(&body), vec!["c"]);
    assert_eq!(body["@iot.count"], json!(1));
}

#[tokio::test]
async fn test_ties_in_sort_key() {
    let host = host_with_things(&["x", "x", "x", "y"]).await;
    let body = read(&host, "$top=2&$orderby=name").await;
    assert_eq!(names(&body), vec!["x", "x"]);

    let body = read(&host, &next_query(&body).unwrap()).await;
    assert_eq!(names(&body), vec!["x", "y"]);
}

#[tokio::test]
async fn test_default_and_max_top() {
    let settings = CoreSettings {
        default_top: 2,
        max_top: 3,
        ..CoreSettings::default()
    };
    let host = Arc::new(ServerBuilder::new().with_settings(settings).build_host().unwrap());
    for name in ["a", "b", "c", "d", "e"] {
        Service::new(host.clone())
            .execute(
                ServiceRequest::new(RequestType::Create, Version::V1_1, "/Things")
                    .with_content(json!({"name": name, "description": "thing"}).to_string()),
            )
            .await;
    }

    let body = read(&host, "").await;
    assert_eq!(body["value"].as_array().unwrap().len(), 2);
    let body = read(&host, "$top=100").await;
    assert_eq!(body["value"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_empty_page_has_no_next_link() {
    let host = host_with_things(&["a", "b", "c"]).await;
    let body = read(&host, "$top=0").await;
    assert_eq!(body["value"], json!([]));
    assert!(body.get("@iot.nextLink").is_none());

    let body = read(&host, "$top=2&$skip=5").await;
    assert_eq!(body["value"], json!([]));
    assert!(body.get("@iot.nextLink").is_none());
}
