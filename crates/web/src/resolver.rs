//! Turns a [`Reply`] into the final response, on top of what the handlers staged.

use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use quill_http::protocol::ReasonPhrase;
use tracing::error;

use crate::body::ResponseBody;
use crate::error::{HandlerError, SerializationError};
use crate::event::Staged;
use crate::reply::Reply;

/// Resolves `reply`; `None` for [`Reply::Continue`].
///
/// `expose_errors` reveals the message of unhandled errors to the client.
pub(crate) fn resolve(staged: &Staged, reply: Reply, expose_errors: bool) -> Option<Response<ResponseBody>> {
    let response = match reply {
        Reply::Continue => return None,
        Reply::NoContent => staged_response(staged, StatusCode::NO_CONTENT, ResponseBody::empty()),
        Reply::Text(text) => {
            let mut response = staged_response(staged, staged.status, text.into());
            response.headers_mut().entry(header::CONTENT_TYPE).or_insert(HeaderValue::from_static("text/html"));
            response
        }
        Reply::Bytes(bytes) => staged_response(staged, staged.status, bytes.into()),
        Reply::Stream(stream) => staged_response(staged, staged.status, ResponseBody::stream(stream)),
        Reply::Error(error) => error_response(staged, &error, expose_errors),
        Reply::Json(value) => match serde_json::to_vec(&value) {
            Ok(json) => {
                let mut response = staged_response(staged, staged.status, json.into());
                response
                    .headers_mut()
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => error_response(staged, &SerializationError::from(e).into(), expose_errors),
        },
        Reply::Response(response) => merge(staged, response),
    };
    Some(response)
}

fn staged_response(staged: &Staged, status: StatusCode, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = staged.headers.clone();
    if let Some(text) = &staged.status_text
        && status == staged.status
    {
        response.extensions_mut().insert(ReasonPhrase::new(text));
    }
    response
}

/// Renders `{statusCode, statusMessage, message, data?}` as JSON with the error's status.
fn error_response(staged: &Staged, error: &HandlerError, expose_errors: bool) -> Response<ResponseBody> {
    let json = match serde_json::to_vec(&error.to_body(expose_errors)) {
        Ok(json) => json,
        Err(e) => {
            error!(cause = %e, "failed to render error response");
            return minimal_error_response();
        }
    };

    let mut response = Response::new(json.into());
    *response.status_mut() = error.status();
    *response.headers_mut() = staged.headers.clone();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(status_message) = error.custom_status_message() {
        response.extensions_mut().insert(ReasonPhrase::new(status_message));
    }
    response
}

fn merge(staged: &Staged, response: Response<ResponseBody>) -> Response<ResponseBody> {
    let (mut parts, body) = response.into_parts();
    let mut headers = staged.headers.clone();
    for name in parts.headers.keys() {
        headers.remove(name);
    }
    for (name, value) in &parts.headers {
        headers.append(name.clone(), value.clone());
    }
    parts.headers = headers;
    Response::from_parts(parts, body)
}

/// The last resort when even the error handler failed.
pub(crate) fn minimal_error_response() -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::from("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
