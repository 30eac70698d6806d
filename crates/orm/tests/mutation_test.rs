//! Update, delete and create through a context, plus conflict handling on reload.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use sitegraph_client::testing::MockTransport;
use sitegraph_orm::prelude::*;
use sitegraph_orm::testing::{fixture_context, GRAPH_WEB, LIST_ID};
use sitegraph_orm::Method;
use uuid::Uuid;

const NEW_LIST_ID: &str = "9a0b7c6d-1e2f-4a3b-8c4d-5e6f7a8b9c0d";

fn list_path() -> String {
    format!("{}/lists/{}", GRAPH_WEB, LIST_ID)
}

fn rest_list_path() -> String {
    format!("_api/web/lists(guid'{}')", LIST_ID)
}

/// A context whose web holds the `Documents` list, loaded over Graph.
async fn loaded_list(options: ContextOptions) -> anyhow::Result<(Arc<MockTransport>, Context, Resource, Resource)> {
    let mock = Arc::new(MockTransport::new());
    let context = fixture_context(mock.clone()).with_options(options);
    mock.route(Protocol::Graph, Method::Get, GRAPH_WEB).reply(json!({
        "lists": [{
            "id": LIST_ID,
            "displayName": "Documents",
            "description": "Shared files",
            "@odata.etag": "\"1\""
        }]
    }));
    let web = context.resource("SP.Web")?;
    context
        .load(&web, &[expand_with("Lists", [field("Title"), field("Description")])])
        .await?;
    let list = web.many("Lists")?.remove(0);
    mock.clear_log();
    Ok((mock, context, web, list))
}

#[tokio::test]
async fn test_update_routes_fields_by_protocol() -> anyhow::Result<()> {
    let (mock, context, _web, list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Graph, Method::Patch, list_path()).reply(json!(null));
    mock.route(Protocol::Rest, Method::Patch, rest_list_path()).reply(json!(null));

    list.set("Title", "Team Documents")?;
    list.set("Hidden", true)?;
    assert!(list.is_dirty());
    assert_eq!(list.state("Title"), FieldState::Modified);

    context.update(&list).await?;

    assert!(!list.is_dirty());
    assert_eq!(list.state("Title"), FieldState::Loaded);
    assert_eq!(list.get("Title")?, Value::from("Team Documents"));
    assert_eq!(mock.round_trips(), 1);

    let requests = mock.requests();
    let graph = requests
        .iter()
        .find(|r| r.protocol == Protocol::Graph)
        .expect("graph patch");
    assert_eq!(graph.body, Some(json!({ "displayName": "Team Documents" })));
    assert!(graph
        .headers
        .contains(&("If-Match".to_string(), "\"1\"".to_string())));
    let rest = requests
        .iter()
        .find(|r| r.protocol == Protocol::Rest)
        .expect("rest patch");
    assert_eq!(rest.body, Some(json!({ "Hidden": true })));
    Ok(())
}

#[tokio::test]
async fn test_mixed_update_sends_each_protocol_its_own_etag() -> anyhow::Result<()> {
    let (mock, context, _web, list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Rest, Method::Get, rest_list_path())
        .with_param("$select", "Id,Hidden")
        .reply(json!({ "Id": LIST_ID, "Hidden": false, "odata.etag": "\"5\"" }));
    context.load(&list, &[field("Hidden")]).await?;
    assert_eq!(list.metadata().etag(Protocol::Graph), Some("\"1\""));
    assert_eq!(list.metadata().etag(Protocol::Rest), Some("\"5\""));

    mock.route(Protocol::Graph, Method::Patch, list_path()).reply(json!(null));
    mock.route(Protocol::Rest, Method::Patch, rest_list_path()).reply(json!(null));
    mock.clear_log();
    list.set("Title", "Team Documents")?;
    list.set("Hidden", true)?;
    context.update(&list).await?;

    let if_match = |protocol: Protocol| {
        mock.requests()
            .into_iter()
            .find(|r| r.protocol == protocol)
            .and_then(|r| {
                r.headers
                    .iter()
                    .find(|(name, _)| name == "If-Match")
                    .map(|(_, value)| value.clone())
            })
    };
    assert_eq!(if_match(Protocol::Graph).as_deref(), Some("\"1\""));
    assert_eq!(if_match(Protocol::Rest).as_deref(), Some("\"5\""));
    Ok(())
}

#[tokio::test]
async fn test_partially_rejected_update_keeps_rejected_fields_modified() -> anyhow::Result<()> {
    let (mock, context, _web, list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Graph, Method::Patch, list_path()).reply(json!(null));
    mock.route(Protocol::Rest, Method::Patch, rest_list_path())
        .fail(412, "Microsoft.SharePoint.Client.ClientServiceException", "Version conflict.");

    list.set("Title", "Team Documents")?;
    list.set("Hidden", true)?;
    let err = context.update(&list).await.unwrap_err();

    assert_eq!(err.service_error().map(|e| e.http_response_code), Some(412));
    assert_eq!(list.state("Title"), FieldState::Loaded);
    assert_eq!(list.state("Hidden"), FieldState::Modified);
    Ok(())
}

#[tokio::test]
async fn test_update_without_changes_sends_nothing() -> anyhow::Result<()> {
    let (mock, context, _web, list) = loaded_list(ContextOptions::default()).await?;
    context.update(&list).await?;

    context.begin_batch()?;
    let item = context.update_batch(&list)?;
    assert_eq!(context.execute_batch().await?.operations, 0);
    item.await?;
    assert_eq!(mock.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reload_over_modified_field_conflicts() -> anyhow::Result<()> {
    let (mock, context, _web, list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Graph, Method::Get, list_path())
        .reply(json!({ "id": LIST_ID, "displayName": "Documents (server)" }));

    list.set("Title", "Mine")?;
    let err = context.load(&list, &[field("Title")]).await.unwrap_err();
    match err {
        OrmError::Conflict {
            resource_type,
            fields,
        } => {
            assert_eq!(resource_type, "SP.List");
            assert_eq!(fields, vec!["Title"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(list.get("Title")?, Value::from("Mine"));
    assert_eq!(list.state("Title"), FieldState::Modified);
    Ok(())
}

#[tokio::test]
async fn test_conflict_policies_on_reload() -> anyhow::Result<()> {
    let keep = ContextOptions::default().conflict_policy(ConflictPolicy::KeepLocal);
    let (mock, context, _web, list) = loaded_list(keep).await?;
    mock.route(Protocol::Graph, Method::Get, list_path()).reply(json!({
        "id": LIST_ID, "displayName": "Documents (server)", "description": "Updated"
    }));
    list.set("Title", "Mine")?;
    context.load(&list, &[field("Title"), field("Description")]).await?;
    assert_eq!(list.get("Title")?, Value::from("Mine"));
    assert_eq!(list.get("Description")?, Value::from("Updated"));

    let overwrite = ContextOptions::default().conflict_policy(ConflictPolicy::Overwrite);
    let (mock, context, _web, list) = loaded_list(overwrite).await?;
    mock.route(Protocol::Graph, Method::Get, list_path())
        .reply(json!({ "id": LIST_ID, "displayName": "Documents (server)" }));
    list.set("Title", "Mine")?;
    context.load(&list, &[field("Title")]).await?;
    assert_eq!(list.get("Title")?, Value::from("Documents (server)"));
    assert!(!list.is_dirty());
    Ok(())
}

#[tokio::test]
async fn test_delete_detaches_and_retires_the_instance() -> anyhow::Result<()> {
    let (mock, context, web, list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Graph, Method::Delete, list_path()).reply(json!(null));

    context.delete(&list).await?;

    assert!(list.is_deleted());
    assert!(web.many("Lists")?.is_empty());
    let request = &mock.requests()[0];
    assert_eq!(request.method, Method::Delete);
    assert!(request
        .headers
        .contains(&("If-Match".to_string(), "\"1\"".to_string())));

    assert!(matches!(
        context.load(&list, &[field("Title")]).await,
        Err(OrmError::Deleted { .. })
    ));
    assert!(matches!(list.set("Title", "x"), Err(OrmError::Deleted { .. })));
    assert_eq!(mock.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_delete_leaves_instance_attached() -> anyhow::Result<()> {
    let (mock, context, web, list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Graph, Method::Delete, list_path())
        .fail(403, "accessDenied", "Access denied");

    assert!(context.delete(&list).await.is_err());
    assert!(!list.is_deleted());
    assert_eq!(web.many("Lists")?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_create_attaches_new_member() -> anyhow::Result<()> {
    let (mock, context, web, _list) = loaded_list(ContextOptions::default()).await?;
    mock.route(Protocol::Graph, Method::Post, format!("{}/lists", GRAPH_WEB))
        .reply(json!({ "id": NEW_LIST_ID, "displayName": "Contracts" }));

    let created = context
        .create(
            &web,
            "Lists",
            [("Title", "Contracts"), ("Description", "Signed contracts")],
        )
        .await?;

    let request = &mock.requests()[0];
    assert_eq!(request.method, Method::Post);
    assert_eq!(
        request.body,
        Some(json!({ "displayName": "Contracts", "description": "Signed contracts" }))
    );

    assert_eq!(created.key(), Some(Value::Guid(Uuid::parse_str(NEW_LIST_ID)?)));
    assert_eq!(created.get("Title")?, Value::from("Contracts"));
    // not echoed by the service, kept as sent
    assert_eq!(created.get("Description")?, Value::from("Signed contracts"));
    assert!(!created.is_dirty());
    assert!(created.parent().is_some_and(|p| p.ptr_eq(&web)));
    assert_eq!(web.many("Lists")?.len(), 2);
    assert_eq!(
        context.address(&created, Protocol::Graph),
        Some(format!("{}/lists/{}", GRAPH_WEB, NEW_LIST_ID))
    );
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_relations_and_unknown_fields() -> anyhow::Result<()> {
    let (mock, context, web, _list) = loaded_list(ContextOptions::default()).await?;

    let err = context
        .create(&web, "Lists", [("ContentTypes", "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));

    let err = context.create(&web, "Lists", [("Nope", 1)]).await.unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));

    let err = context.create(&web, "Title", [("Title", "x")]).await.unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));
    assert_eq!(mock.request_count(), 0);
    Ok(())
}
