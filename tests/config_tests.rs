//! Settings loaded from YAML drive the assembled server

use sta::prelude::*;
use std::io::Write;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(yaml.as_bytes()).expect("write config");
    file
}

async fn exec(host: &Arc<ServerHost>, request: ServiceRequest) -> ServiceResponse {
    Service::new(host.clone()).execute(request).await
}

#[tokio::test]
async fn test_service_root_from_file() {
    let file = write_config("service_root_url: https://sensors.example.org/api/\n");
    let settings = CoreSettings::from_yaml_file(file.path()).unwrap();
    let host = Arc::new(ServerBuilder::new().with_settings(settings).build_host().unwrap());

    let response = exec(
        &host,
        ServiceRequest::new(RequestType::Create, Version::V1_0, "/Things")
            .with_content(r#"{"name": "lamp", "description": "thing"}"#),
    )
    .await;
    assert_eq!(response.code, 201);
    let location = response.header("Location").unwrap();
    assert!(location.starts_with("https://sensors.example.org/api/v1.0/Things("));
}

#[tokio::test]
async fn test_custom_links_from_file() {
    let file = write_config(
        r#"
custom_links:
  enabled: true
  recurse_depth: 1
"#,
    );
    let settings = CoreSettings::from_yaml_file(file.path()).unwrap();
    let host = Arc::new(ServerBuilder::new().with_settings(settings).build_host().unwrap());

    let owner = exec(
        &host,
        ServiceRequest::new(RequestType::Create, Version::V1_1, "/Things")
            .with_content(r#"{"name": "owner", "description": "thing"}"#),
    )
    .await
    .body
    .unwrap()["@iot.id"]
        .clone();

    let body = json!({
        "name": "lamp",
        "description": "thing",
        "properties": {
            "owner.Thing@iot.id": owner,
            "owner.Thing@iot.navigationLink": "stale",
            "nested": {"peer.Thing@iot.id": owner}
        }
    });
    let created = exec(
        &host,
        ServiceRequest::new(RequestType::Create, Version::V1_1, "/Things")
            .with_content(body.to_string()),
    )
    .await;
    assert_eq!(created.code, 201);
    let id = created.body.unwrap()["@iot.id"].clone();

    let response = exec(
        &host,
        ServiceRequest::new(RequestType::Read, Version::V1_1, format!("/Things({id})")),
    )
    .await;
    let properties = &response.body.unwrap()["properties"];
    let link = format!("http://localhost:8080/v1.1/Things({owner})");
    assert_eq!(properties["owner.Thing@iot.navigationLink"], json!(link));
    assert_eq!(properties["nested"]["peer.Thing@iot.navigationLink"], json!(link));
}

#[tokio::test]
async fn test_plugins_from_file() {
    let file = write_config("plugins: [actuation, core]\n");
    let settings = CoreSettings::from_yaml_file(file.path()).unwrap();
    let host = Arc::new(ServerBuilder::new().with_settings(settings).build_host().unwrap());
    assert!(host.entity_sets().contains(&"Actuators"));

    let response = exec(
        &host,
        ServiceRequest::new(RequestType::Read, Version::V1_1, "/Actuators"),
    )
    .await;
    assert_eq!(response.code, 200);
}

#[test]
fn test_malformed_file_is_config_error() {
    let file = write_config("default_top: [not a number\n");
    let err = CoreSettings::from_yaml_file(file.path()).unwrap_err();
    assert_eq!(err.error_code(), "CONFIG_ERROR");
}
