//! Demo controller: a query-driven greeting and a validated body greeting.

use apikit::schema::{api_output, of, validated};
use apikit::{
    api_response, controller, get, post, ConfigurationError, Controller, Failure, Middleware, Scope,
};
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct HelloQuery {
    /// Who to greet
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct HelloInput {
    pub query: HelloQuery,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct NewGreeting {
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    #[serde(default)]
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateGreetingInput {
    #[validate(nested)]
    pub body: NewGreeting,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Greeting {
    pub message: String,
    pub recipient: String,
}

fn hello_message(name: Option<&str>) -> String {
    format!("Hello {}!", name.unwrap_or("everyone"))
}

pub fn greeting_controller() -> Result<Controller, ConfigurationError> {
    let hello = get("/hello", Some("sayHello"))?
        .with_description("Greets the caller, or everyone")
        .with_input(of::<HelloInput>())
        .with_output(api_output(of::<String>()))
        .with_handler(|input: HelloInput, _| async move {
            Ok::<_, Failure>(api_response(hello_message(input.query.name.as_deref())))
        });

    let create = post("/greetings", Some("createGreeting"))?
        .with_description("Builds a personal greeting")
        .with_input(validated::<CreateGreetingInput>())
        .with_output(api_output(of::<Greeting>()))
        .with_handler(|input: CreateGreetingInput, ctx| async move {
            tracing::debug!(
                request_id = ?ctx.request_id,
                name = %input.body.name,
                "Creating greeting"
            );
            Ok::<_, Failure>(api_response(Greeting {
                message: hello_message(Some(&input.body.name)),
                recipient: input.body.email.unwrap_or_else(|| input.body.name.clone()),
            }))
        });

    let served_by = Middleware::from_fn(Scope::Before, |ex| {
        ex.set_header(
            http::header::HeaderName::from_static("x-served-by"),
            HeaderValue::from_static("greeting-server"),
        );
        Ok(())
    })
    .named("ServedBy");

    Ok(controller("Greeting")
        .with_description("Friendly greetings")
        .with_middleware(served_by)
        .with_endpoint(hello)
        .with_endpoint(create))
}
