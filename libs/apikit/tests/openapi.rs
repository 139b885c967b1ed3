use std::sync::Arc;

use apikit::{api_response, controller, get, post, schema, Failure, Server};
use axum::body::Body;
use http::{header, Request, StatusCode};
use runtime::{DocsConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceExt;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
struct NewUser {
    /// Display name
    name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
struct CreateUserInput {
    body: NewUser,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
struct UserParams {
    /// User identifier
    id: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
struct GetUserInput {
    params: UserParams,
}

fn server() -> Server {
    let create = post("/users", Some("createUser"))
        .unwrap()
        .with_input(schema::of::<CreateUserInput>())
        .with_output(schema::api_output(schema::of::<NewUser>()))
        .with_handler(|input: CreateUserInput, _| async move {
            Ok::<_, Failure>(api_response(input.body))
        });
    let fetch = get("/users/:id", None)
        .unwrap()
        .with_input(schema::of::<GetUserInput>())
        .with_handler(|input: GetUserInput, _| async move {
            Ok::<_, Failure>(api_response(input.params.id))
        });

    let docs = DocsConfig {
        title: "Users API".into(),
        version: "2.1.0".into(),
        ..Default::default()
    };
    Server::builder(ServerConfig::default(), docs)
        .controller(
            controller("Users")
                .with_description("User management")
                .with_endpoint(create)
                .with_endpoint(fetch),
        )
        .build()
        .unwrap()
}

async fn fetch(server: &Server, uri: &str) -> (StatusCode, String, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = server.router().oneshot(req).await.unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn serves_document_for_registered_controllers() {
    let server = server();
    let (status, content_type, body) = fetch(&server, "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("application/json"));

    let doc: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(doc["openapi"], "3.0.0");
    assert_eq!(doc["info"]["title"], "Users API");
    assert_eq!(doc["info"]["version"], "2.1.0");
    assert_eq!(doc["servers"][0]["url"], "/");

    let create = &doc["paths"]["/users"]["post"];
    assert_eq!(create["operationId"], "UserscreateUser");
    assert_eq!(create["tags"][0], "Users");
    assert!(create["requestBody"]["content"]["application/json"]["schema"].is_object());

    let fetch_op = &doc["paths"]["/users/{id}"]["get"];
    assert_eq!(fetch_op["operationId"], "UsersgetUsersId");
    assert_eq!(fetch_op["parameters"][0]["name"], "id");
    assert_eq!(fetch_op["parameters"][0]["in"], "path");
    assert_eq!(fetch_op["parameters"][0]["required"], true);
    assert_eq!(
        fetch_op["responses"]["200"]["content"]["application/json"]["schema"]["$ref"],
        "#/components/schemas/UntypedResponse"
    );

    let tags = doc["tags"].as_array().unwrap();
    assert!(tags
        .iter()
        .any(|t| t["name"] == "Users" && t["description"] == "User management"));
    assert!(tags.iter().any(|t| t["name"] == "OpenAPI"));
}

#[tokio::test]
async fn serves_reference_page() {
    let server = server();
    let (status, content_type, body) = fetch(&server, "/api.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/html"));
    assert!(body.contains("<rapi-doc"));
    assert!(body.contains("./openapi.json"));
}

#[tokio::test]
async fn document_is_built_once() {
    let server = server();
    let description = server.api_description();

    let first = description.get_document();
    let (_, _, body) = fetch(&server, "/openapi.json").await;
    let second = description.get_document();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), *first);
}

#[tokio::test]
async fn disabled_docs_are_not_served() {
    let docs = DocsConfig {
        enabled: false,
        ..Default::default()
    };
    let server = Server::builder(ServerConfig::default(), docs).build().unwrap();
    let (status, _, _) = fetch(&server, "/openapi.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
