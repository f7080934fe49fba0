//! The five request handlers of the document API. Every handler validates
//! the same ladder: required services registered, HTTP Basic credentials
//! accepted, `content-type: application/json` present. Handlers never
//! fail outward; every outcome is a well-formed response.

use doc::{Fields, Value};
use httpd::{Request, Response, APPLICATION_JSON};
use store::{DocumentStore, ServiceMap, UserPool};

pub const DATABASE_SERVICE: &str = "db";
pub const USER_SERVICE: &str = "user";

const NO_SUCCESS: &str = r#"{"success":false}"#;

pub fn insert(request: &Request, services: &mut ServiceMap) -> Response {
    if let Some(response) = validate(request, services) {
        return response;
    }
    let document = match parse_object(request.body()) {
        Some(document) => document,
        None => return failure(400),
    };
    let store = match database_mut(services) {
        Some(store) => store,
        None => return failure(500),
    };
    match store.insert(document) {
        Ok(id) => {
            let mut fields = Fields::new();
            fields.insert("success".to_string(), Value::Bool(true));
            fields.insert("id".to_string(), Value::String(id));
            ok(Value::Object(fields))
        }
        Err(error) => {
            tracing::error!(%error, "insert failed");
            failure(500)
        }
    }
}

pub fn erase(request: &Request, services: &mut ServiceMap) -> Response {
    if let Some(response) = validate(request, services) {
        return response;
    }
    let id = match requested_id(request.body()) {
        Some(id) => id,
        None => return failure(400),
    };
    let store = match database_mut(services) {
        Some(store) => store,
        None => return failure(500),
    };
    match store.erase(&id) {
        Ok(id) => {
            let mut fields = Fields::new();
            fields.insert("success".to_string(), Value::Bool(true));
            fields.insert("id".to_string(), Value::String(id));
            ok(Value::Object(fields))
        }
        Err(store::Error::NotFound(_)) => failure(400),
        Err(error) => {
            tracing::error!(%error, "erase failed");
            failure(500)
        }
    }
}

pub fn find(request: &Request, services: &mut ServiceMap) -> Response {
    if let Some(response) = validate(request, services) {
        return response;
    }
    let id = match requested_id(request.body()) {
        Some(id) => id,
        None => return failure(400),
    };
    let store = match database(services) {
        Some(store) => store,
        None => return failure(500),
    };

    let mut fields = Fields::new();
    fields.insert("success".to_string(), Value::Bool(true));
    fields.insert("id".to_string(), Value::String(id.clone()));
    match store.find(&id) {
        Ok(document) => {
            fields.insert("found".to_string(), Value::Bool(true));
            fields.insert("document".to_string(), document);
        }
        Err(_) => {
            fields.insert("found".to_string(), Value::Bool(false));
        }
    }
    ok(Value::Object(fields))
}

pub fn keys(request: &Request, services: &mut ServiceMap) -> Response {
    if let Some(response) = validate(request, services) {
        return response;
    }
    let store = match database(services) {
        Some(store) => store,
        None => return failure(500),
    };
    let keys = store.keys().into_iter().map(Value::String).collect();

    let mut fields = Fields::new();
    fields.insert("keys".to_string(), Value::Array(keys));
    ok(Value::Object(fields))
}

pub fn image(request: &Request, services: &mut ServiceMap) -> Response {
    if let Some(response) = validate(request, services) {
        return response;
    }
    let store = match database(services) {
        Some(store) => store,
        None => return failure(500),
    };
    ok(store.image())
}

// The shared validation ladder. Returns the failure response to send, or
// None when the request may proceed.
fn validate(request: &Request, services: &ServiceMap) -> Option<Response> {
    if database(services).is_none() || users(services).is_none() {
        return Some(failure(500));
    }
    if !access_permitted(request, services) {
        return Some(failure(401));
    }
    if request.header("content-type") != Some(APPLICATION_JSON) {
        return Some(failure(400));
    }
    None
}

fn access_permitted(request: &Request, services: &ServiceMap) -> bool {
    let pool = match users(services) {
        Some(pool) => pool,
        None => return false,
    };
    let header = match request.header("authorization") {
        Some(header) => header,
        None => return false,
    };
    let (scheme, token) = match header.split_once(' ') {
        Some(parts) => parts,
        None => return false,
    };
    if scheme != "Basic" {
        return false;
    }
    let decoded = match base64::decode(token).ok().and_then(|b| String::from_utf8(b).ok()) {
        Some(decoded) => decoded,
        None => return false,
    };
    match decoded.split_once(':') {
        Some((user, password)) => pool.access_permitted(user, password),
        None => false,
    }
}

fn database<'s>(services: &'s ServiceMap) -> Option<&'s DocumentStore> {
    services
        .get(DATABASE_SERVICE)
        .and_then(|service| service.as_any().downcast_ref())
}

fn database_mut<'s>(services: &'s mut ServiceMap) -> Option<&'s mut DocumentStore> {
    services
        .get_mut(DATABASE_SERVICE)
        .and_then(|service| service.as_any_mut().downcast_mut())
}

fn users<'s>(services: &'s ServiceMap) -> Option<&'s UserPool> {
    services
        .get(USER_SERVICE)
        .and_then(|service| service.as_any().downcast_ref())
}

fn parse_object(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    let value = Value::parse(text).ok()?;
    value.as_object()?;
    Some(value)
}

fn requested_id(body: &[u8]) -> Option<String> {
    let document = parse_object(body)?;
    document.get("id")?.as_str().map(str::to_string)
}

fn ok(body: Value) -> Response {
    Response::with_body(200, APPLICATION_JSON, body.to_json())
}

fn failure(status: u16) -> Response {
    Response::with_body(status, APPLICATION_JSON, NO_SUCCESS)
}
