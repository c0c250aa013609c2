//! Request engine tests against the bundled in-memory store
//!
//! These tests verify that:
//! - Creates complete the parent from the path and answer with `Location`
//! - Reads render links, paging and the `$value` shapes
//! - Updates and deletes honour their path and query restrictions
//! - `$ref` deletes remove only the relation
//! - Explicit transactions undo failing calls on their own

use sta::prelude::*;

fn host() -> Arc<ServerHost> {
    Arc::new(
        ServerBuilder::new()
            .build_host()
            .expect("default host should build"),
    )
}

async fn exec(host: &Arc<ServerHost>, request: ServiceRequest) -> ServiceResponse {
    Service::new(host.clone()).execute(request).await
}

fn req(request_type: RequestType, path: &str) -> ServiceRequest {
    ServiceRequest::new(request_type, Version::V1_1, path)
}

async fn create(host: &Arc<ServerHost>, path: &str, body: Value) -> i64 {
    let response = exec(host, req(RequestType::Create, path).with_content(body.to_string())).await;
    assert_eq!(response.code, 201, "create {path} failed: {:?}", response.body);
    response.body.as_ref().expect("created entity body")["@iot.id"]
        .as_i64()
        .expect("numeric id")
}

async fn read(host: &Arc<ServerHost>, path: &str, query: &str) -> ServiceResponse {
    exec(host, req(RequestType::Read, path).with_query(query)).await
}

fn thing(name: &str) -> Value {
    json!({"name": name, "description": format!("{name} thing")})
}

/// A Thing with one Datastream, its Sensor and ObservedProperty
struct Fixture {
    thing: i64,
    sensor: i64,
    observed_property: i64,
    datastream: i64,
}

async fn fixture(host: &Arc<ServerHost>) -> Fixture {
    let thing = create(host, "/Things", thing("lamp")).await;
    let sensor = create(
        host,
        "/Sensors",
        json!({"name": "lux", "description": "light", "encodingType": "text/plain", "metadata": "none"}),
    )
    .await;
    let observed_property = create(
        host,
        "/ObservedProperties",
        json!({"name": "illuminance", "definition": "urn:lux", "description": "light level"}),
    )
    .await;
    let datastream = create(
        host,
        &format!("/Things({thing})/Datastreams"),
        json!({
            "name": "brightness",
            "description": "lamp brightness",
            "observationType": "OM_Measurement",
            "unitOfMeasurement": {"name": "lux", "symbol": "lx"},
            "Sensor": {"@iot.id": sensor},
            "ObservedProperty": {"@iot.id": observed_property}
        }),
    )
    .await;
    Fixture {
        thing,
        sensor,
        observed_property,
        datastream,
    }
}

// =============================================================================
// Create
// =============================================================================

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_returns_location() {
        let host = host();
        let response = exec(
            &host,
            req(RequestType::Create, "/Things").with_content(thing("lamp").to_string()),
        )
        .await;

        assert_eq!(response.code, 201);
        let body = response.body.as_ref().unwrap();
        let id = body["@iot.id"].as_i64().unwrap();
        let location = format!("http://localhost:8080/v1.1/Things({id})");
        assert_eq!(response.header("Location"), Some(location.as_str()));
        assert_eq!(body["@iot.selfLink"], json!(location));
        assert_eq!(body["name"], json!("lamp"));
        assert_eq!(
            body["Datastreams@iot.navigationLink"],
            json!(format!("{location}/Datastreams"))
        );
    }

    #[tokio::test]
    async fn test_create_under_parent_links_parent() {
        let host = host();
        let f = fixture(&host).await;

        let response = read(&host, &format!("/Datastreams({})/Thing", f.datastream), "").await;
        assert_eq!(response.code, 200);
        assert_eq!(response.body.unwrap()["@iot.id"], json!(f.thing));

        let response = read(&host, &format!("/Things({})/Datastreams", f.thing), "").await;
        let body = response.body.unwrap();
        assert_eq!(body["value"].as_array().unwrap().len(), 1);
        assert_eq!(body["value"][0]["@iot.id"], json!(f.datastream));
    }

    #[tokio::test]
    async fn test_create_conflicting_parent_is_rejected() {
        let host = host();
        let f = fixture(&host).await;
        let other = create(&host, "/Things", thing("fan")).await;

        let response = exec(
            &host,
            req(RequestType::Create, &format!("/Things({other})/Datastreams")).with_content(
                json!({
                    "name": "speed",
                    "description": "fan speed",
                    "observationType": "OM_Measurement",
                    "unitOfMeasurement": {},
                    "Thing": {"@iot.id": f.thing},
                    "Sensor": {"@iot.id": f.sensor},
                    "ObservedProperty": {"@iot.id": f.observed_property}
                })
                .to_string(),
            ),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_create_incomplete_entity() {
        let host = host();
        let response = exec(
            &host,
            req(RequestType::Create, "/Things").with_content(r#"{"name": "lamp"}"#),
        )
        .await;
        assert_eq!(response.code, 400);
        assert_eq!(response.body.unwrap()["code"], json!("INCOMPLETE_ENTITY"));
    }

    #[tokio::test]
    async fn test_create_with_missing_reference() {
        let host = host();
        let f = fixture(&host).await;
        let response = exec(
            &host,
            req(RequestType::Create, "/Observations").with_content(
                json!({"result": 3, "Datastream": {"@iot.id": f.datastream + 100}}).to_string(),
            ),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_create_on_entity_is_not_allowed() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let response = exec(
            &host,
            req(RequestType::Create, &format!("/Things({id})")).with_content(thing("x").to_string()),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_prefer_minimal_has_no_body() {
        let host = host();
        let response = exec(
            &host,
            req(RequestType::Create, "/Things")
                .with_content(thing("lamp").to_string())
                .with_prefer("return=minimal"),
        )
        .await;
        assert_eq!(response.code, 201);
        assert!(response.body.is_none());
        assert!(response.header("Location").is_some());
    }
}

// =============================================================================
// Read
// =============================================================================

mod read_tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_entity_is_canned_404() {
        let host = host();
        let response = read(&host, "/Things(99)", "").await;
        assert_eq!(response.code, 404);
        assert_eq!(response.message.as_deref(), Some("Nothing found."));

        let response = exec(
            &host,
            ServiceRequest::new(RequestType::Read, Version::V1_0, "/Things(99)"),
        )
        .await;
        assert_eq!(response.message.as_deref(), Some("Not Found"));
    }

    #[tokio::test]
    async fn test_read_malformed_path_is_404() {
        let host = host();
        let response = read(&host, "/Gadgets", "").await;
        assert_eq!(response.code, 404);
    }

    #[tokio::test]
    async fn test_read_property_and_value() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;

        let response = read(&host, &format!("/Things({id})/name"), "").await;
        assert_eq!(response.code, 200);
        assert_eq!(response.body.unwrap(), json!({"name": "lamp"}));

        let response = read(&host, &format!("/Things({id})/name/$value"), "").await;
        assert_eq!(response.code, 200);
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.body.unwrap(), json!("lamp"));
    }

    #[tokio::test]
    async fn test_custom_property_names_are_decoded_once() {
        let host = host();
        let id = create(
            &host,
            "/Things",
            json!({"name": "lamp", "description": "d", "properties": {"a%41": 1, "aA": 2}}),
        )
        .await;

        let response = read(&host, &format!("/Things({id})/properties/a%2541"), "").await;
        assert_eq!(response.code, 200);
        assert_eq!(response.body.unwrap(), json!({"a%41": 1}));

        let response = read(&host, &format!("/Things({id})/properties/a%41"), "").await;
        assert_eq!(response.body.unwrap(), json!({"aA": 2}));
    }

    #[tokio::test]
    async fn test_read_unset_property_is_204() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let response = read(&host, &format!("/Things({id})/properties"), "").await;
        assert_eq!(response.code, 204);
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn test_read_bad_query_is_400() {
        let host = host();
        assert_eq!(read(&host, "/Things", "$top=lots").await.code, 400);
        assert_eq!(read(&host, "/Things", "$bogus=1").await.code, 400);
        assert_eq!(read(&host, "/Things", "$format=csv").await.code, 400);
    }

    #[tokio::test]
    async fn test_read_with_expand() {
        let host = host();
        let f = fixture(&host).await;
        let response = read(
            &host,
            &format!("/Things({})", f.thing),
            "$expand=Datastreams",
        )
        .await;
        let body = response.body.unwrap();
        assert_eq!(body["Datastreams"][0]["@iot.id"], json!(f.datastream));
        assert!(body.get("Datastreams@iot.navigationLink").is_none());
    }

    #[tokio::test]
    async fn test_ref_read_renders_only_links() {
        let host = host();
        let f = fixture(&host).await;
        let response = read(&host, &format!("/Things({})/Datastreams/$ref", f.thing), "").await;
        let body = response.body.unwrap();
        assert_eq!(
            body["value"][0],
            json!({"@iot.selfLink": format!("http://localhost:8080/v1.1/Datastreams({})", f.datastream)})
        );
    }

    #[tokio::test]
    async fn test_relative_navigation_links() {
        let settings = CoreSettings {
            use_absolute_navigation_links: false,
            ..CoreSettings::default()
        };
        let host = Arc::new(
            ServerBuilder::new()
                .with_settings(settings)
                .build_host()
                .unwrap(),
        );
        let id = create(&host, "/Things", thing("lamp")).await;
        let body = read(&host, "/Things", "").await.body.unwrap();
        assert_eq!(
            body["value"][0]["Locations@iot.navigationLink"],
            json!(format!("Things({id})/Locations"))
        );
    }

    #[tokio::test]
    async fn test_service_document() {
        let host = host();
        let response = exec(&host, req(RequestType::GetCapabilities, "")).await;
        assert_eq!(response.code, 200);
        let body = response.body.unwrap();
        let sets = body["value"].as_array().unwrap();
        assert_eq!(sets.len(), 8);
        assert!(sets.contains(&json!({
            "name": "Things",
            "url": "http://localhost:8080/v1.1/Things"
        })));
    }
}

// =============================================================================
// Update
// =============================================================================

mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_changes_only_given_properties() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let response = exec(
            &host,
            req(RequestType::UpdateChanges, &format!("/Things({id})"))
                .with_content(r#"{"name": "bulb"}"#),
        )
        .await;
        assert_eq!(response.code, 200);

        let body = read(&host, &format!("/Things({id})"), "").await.body.unwrap();
        assert_eq!(body["name"], json!("bulb"));
        assert_eq!(body["description"], json!("lamp thing"));
    }

    #[tokio::test]
    async fn test_put_requires_all_properties() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let response = exec(
            &host,
            req(RequestType::UpdateAll, &format!("/Things({id})"))
                .with_content(r#"{"name": "bulb"}"#),
        )
        .await;
        assert_eq!(response.code, 400);

        let body = read(&host, &format!("/Things({id})"), "").await.body.unwrap();
        assert_eq!(body["name"], json!("lamp"));
    }

    #[tokio::test]
    async fn test_update_with_query_is_rejected() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let response = exec(
            &host,
            req(RequestType::UpdateAll, &format!("/Things({id})"))
                .with_query("$select=name")
                .with_content(thing("bulb").to_string()),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_update_on_set_is_rejected() {
        let host = host();
        let response = exec(
            &host,
            req(RequestType::UpdateChanges, "/Things").with_content(r#"{"name": "x"}"#),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_update_missing_entity_is_404() {
        let host = host();
        let response = exec(
            &host,
            req(RequestType::UpdateChanges, "/Things(42)").with_content(r#"{"name": "x"}"#),
        )
        .await;
        assert_eq!(response.code, 404);
    }

    #[tokio::test]
    async fn test_json_patch() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let patch = json!([
            {"op": "replace", "path": "/name", "value": "bulb"},
            {"op": "add", "path": "/properties", "value": {"room": "hall"}}
        ]);
        let response = exec(
            &host,
            req(RequestType::UpdateChangeset, &format!("/Things({id})"))
                .with_content(patch.to_string()),
        )
        .await;
        assert_eq!(response.code, 200);

        let body = read(&host, &format!("/Things({id})"), "").await.body.unwrap();
        assert_eq!(body["name"], json!("bulb"));
        assert_eq!(body["properties"]["room"], json!("hall"));
    }

    #[tokio::test]
    async fn test_update_through_to_one_navigation() {
        let host = host();
        let f = fixture(&host).await;
        let response = exec(
            &host,
            req(RequestType::UpdateChanges, &format!("/Datastreams({})/Thing", f.datastream))
                .with_content(r#"{"name": "renamed"}"#),
        )
        .await;
        assert_eq!(response.code, 200);
        let body = read(&host, &format!("/Things({})", f.thing), "").await.body.unwrap();
        assert_eq!(body["name"], json!("renamed"));
    }
}

// =============================================================================
// Delete
// =============================================================================

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_entity() {
        let host = host();
        let id = create(&host, "/Things", thing("lamp")).await;
        let path = format!("/Things({id})");
        assert_eq!(exec(&host, req(RequestType::Delete, &path)).await.code, 200);
        assert_eq!(read(&host, &path, "").await.code, 404);
        assert_eq!(exec(&host, req(RequestType::Delete, &path)).await.code, 404);
    }

    #[tokio::test]
    async fn test_delete_by_query_disabled_by_default() {
        let host = host();
        create(&host, "/Things", thing("lamp")).await;
        let response = exec(
            &host,
            req(RequestType::Delete, "/Things").with_query("$filter=name eq 'lamp'"),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_delete_by_query() {
        let settings = CoreSettings {
            filter_delete_enabled: true,
            ..CoreSettings::default()
        };
        let host = Arc::new(
            ServerBuilder::new()
                .with_settings(settings)
                .build_host()
                .unwrap(),
        );
        create(&host, "/Things", thing("lamp")).await;
        let fan = create(&host, "/Things", thing("fan")).await;

        let response = exec(
            &host,
            req(RequestType::Delete, "/Things").with_query("$filter=name eq 'lamp'"),
        )
        .await;
        assert_eq!(response.code, 200);

        let body = read(&host, "/Things", "").await.body.unwrap();
        let ids: Vec<_> = body["value"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["@iot.id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(fan)]);

        let response = exec(
            &host,
            req(RequestType::Delete, "/Things").with_query("$filter=name eq 'fan'&$top=1"),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_delete_ref_with_id() {
        let host = host();
        let thing_id = create(&host, "/Things", thing("lamp")).await;
        let location = create(
            &host,
            &format!("/Things({thing_id})/Locations"),
            json!({
                "name": "hall",
                "description": "the hall",
                "encodingType": "application/geo+json",
                "location": {"type": "Point", "coordinates": [0, 0]}
            }),
        )
        .await;

        let response = exec(
            &host,
            req(RequestType::Delete, &format!("/Things({thing_id})/Locations/$ref")).with_query(
                format!("$id=http://localhost:8080/v1.1/Locations({location})"),
            ),
        )
        .await;
        assert_eq!(response.code, 204);

        assert_eq!(read(&host, &format!("/Things({thing_id})"), "").await.code, 200);
        assert_eq!(read(&host, &format!("/Locations({location})"), "").await.code, 200);
        let body = read(&host, &format!("/Things({thing_id})/Locations"), "")
            .await
            .body
            .unwrap();
        assert_eq!(body["value"], json!([]));
    }

    #[tokio::test]
    async fn test_delete_ref_by_key() {
        let host = host();
        let thing_id = create(&host, "/Things", thing("lamp")).await;
        let location = create(
            &host,
            &format!("/Things({thing_id})/Locations"),
            json!({
                "name": "hall",
                "description": "the hall",
                "encodingType": "application/geo+json",
                "location": {}
            }),
        )
        .await;
        let path = format!("/Things({thing_id})/Locations({location})/$ref");
        assert_eq!(exec(&host, req(RequestType::Delete, &path)).await.code, 204);
        // the relation is gone, so the path no longer resolves
        assert_eq!(exec(&host, req(RequestType::Delete, &path)).await.code, 404);
    }

    #[tokio::test]
    async fn test_delete_ref_of_optional_to_one() {
        let host = host();
        let f = fixture(&host).await;
        let observation = create(
            &host,
            &format!("/Datastreams({})/Observations", f.datastream),
            json!({
                "result": 21,
                "FeatureOfInterest": {
                    "name": "desk",
                    "description": "the desk",
                    "encodingType": "application/geo+json",
                    "feature": {}
                }
            }),
        )
        .await;
        let foi_path = format!("/Observations({observation})/FeatureOfInterest");
        let foi = read(&host, &foi_path, "").await;
        assert_eq!(foi.code, 200);
        let foi_id = foi.body.unwrap()["@iot.id"].as_i64().unwrap();

        let response = exec(&host, req(RequestType::Delete, &format!("{foi_path}/$ref"))).await;
        assert_eq!(response.code, 204);

        assert_eq!(read(&host, &foi_path, "").await.code, 404);
        assert_eq!(read(&host, &format!("/Observations({observation})"), "").await.code, 200);
        assert_eq!(read(&host, &format!("/FeaturesOfInterest({foi_id})"), "").await.code, 200);
    }

    #[tokio::test]
    async fn test_delete_ref_of_required_relation() {
        let host = host();
        let f = fixture(&host).await;
        let response = exec(
            &host,
            req(RequestType::Delete, &format!("/Datastreams({})/Thing/$ref", f.datastream)),
        )
        .await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn test_delete_ref_to_missing_target() {
        let host = host();
        let thing_id = create(&host, "/Things", thing("lamp")).await;
        let response = exec(
            &host,
            req(RequestType::Delete, &format!("/Things({thing_id})/Locations/$ref"))
                .with_query("$id=http://localhost:8080/v1.1/Locations(77)"),
        )
        .await;
        assert_eq!(response.code, 404);
    }

    #[tokio::test]
    async fn test_delete_ref_with_wrong_type() {
        let host = host();
        let f = fixture(&host).await;
        let response = exec(
            &host,
            req(RequestType::Delete, &format!("/Things({})/Locations/$ref", f.thing))
                .with_query(format!("$id=http://localhost:8080/v1.1/Sensors({})", f.sensor)),
        )
        .await;
        assert_eq!(response.code, 400);
    }
}

// =============================================================================
// Transactions
// =============================================================================

mod transaction_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_call_keeps_earlier_work() {
        let host = host();
        let mut service = Service::new(host.clone());
        service.start_transaction().await.unwrap();

        let ok = service
            .execute(req(RequestType::Create, "/Things").with_content(thing("lamp").to_string()))
            .await;
        assert_eq!(ok.code, 201);
        let bad = service
            .execute(req(RequestType::Create, "/Things").with_content(r#"{"name": "x"}"#))
            .await;
        assert_eq!(bad.code, 400);

        // nothing visible before commit
        assert_eq!(
            read(&host, "/Things", "").await.body.unwrap()["value"],
            json!([])
        );
        service.commit_transaction().await.unwrap();

        let body = read(&host, "/Things", "$count=true").await.body.unwrap();
        assert_eq!(body["@iot.count"], json!(1));
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let host = host();
        let mut service = Service::new(host.clone());
        service.start_transaction().await.unwrap();
        service
            .execute(req(RequestType::Create, "/Things").with_content(thing("lamp").to_string()))
            .await;
        service.rollback_transaction().await.unwrap();
        assert!(!service.is_transaction_active());

        let body = read(&host, "/Things", "").await.body.unwrap();
        assert_eq!(body["value"], json!([]));
    }

    #[tokio::test]
    async fn test_transaction_state_errors() {
        let host = host();
        let mut service = Service::new(host);
        assert!(service.commit_transaction().await.is_err());
        service.start_transaction().await.unwrap();
        assert!(service.start_transaction().await.is_err());
        service.rollback_transaction().await.unwrap();
    }

    #[tokio::test]
    async fn test_changeset_rolls_back_on_failure() {
        let host = host();
        let mut service = Service::new(host.clone());
        let responses = service
            .execute_changeset(vec![
                req(RequestType::Create, "/Things").with_content(thing("lamp").to_string()),
                req(RequestType::Create, "/Things").with_content(r#"{"description": "x"}"#),
                req(RequestType::Create, "/Things").with_content(thing("fan").to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].code, 201);
        assert_eq!(responses[1].code, 400);
        let body = read(&host, "/Things", "").await.body.unwrap();
        assert_eq!(body["value"], json!([]));
    }

    #[tokio::test]
    async fn test_changeset_commits_on_success() {
        let host = host();
        let mut service = Service::new(host.clone());
        let responses = service
            .execute_changeset(vec![
                req(RequestType::Create, "/Things").with_content(thing("lamp").to_string()),
                req(RequestType::Create, "/Things").with_content(thing("fan").to_string()),
            ])
            .await
            .unwrap();
        assert!(responses.iter().all(ServiceResponse::is_success));
        let body = read(&host, "/Things", "$count=true").await.body.unwrap();
        assert_eq!(body["@iot.count"], json!(2));
    }
}
