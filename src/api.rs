use std::borrow::Cow;
use std::fmt::{self, Debug, Display};

use actix_web::{
    body::BoxBody, error, http::StatusCode, Error as ActixError, HttpRequest, HttpResponse,
    Responder, ResponseError,
};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Uniform JSON envelope every route answers with. The HTTP status is always
/// 200; `code` carries the application-level outcome.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiResult<T = ()> {
    pub code: i32,
    pub msg: Option<Cow<'static, str>>,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResult<T> {
    pub fn new() -> Self {
        Self {
            code: 200,
            msg: None,
            data: None,
        }
    }
    pub fn code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }
    pub fn with_msg<S: Into<Cow<'static, str>>>(mut self, msg: S) -> Self {
        self.msg = Some(msg.into());
        self
    }
    pub fn msg_as_str(&self) -> &str {
        self.msg.as_ref().map(|s| s.as_ref()).unwrap_or_default()
    }
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }
    pub fn from_err(err: &Error) -> Self {
        Self::new().code(err.status_code()).with_msg(err.to_string())
    }
    pub fn log_to_resp(&self, req: &HttpRequest) -> HttpResponse {
        self.log(req);
        self.to_resp()
    }
    pub fn log(&self, req: &HttpRequest) {
        info!(
            "{} \"{} {} {:?}\" {}",
            req.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
            req.method(),
            req.uri(),
            req.version(),
            self.code
        );
    }
    pub fn to_resp(&self) -> HttpResponse {
        match serde_json::to_string(self) {
            Ok(json) => HttpResponse::Ok()
                .content_type("application/json")
                .body(json),
            Err(e) => ActixError::from(e).into(),
        }
    }
}

impl<T: Serialize> Default for ApiResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug + Serialize> Display for ApiResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type ApiError = ApiResult<()>;

impl<T: Debug + Serialize> ResponseError for ApiResult<T> {
    fn status_code(&self) -> StatusCode {
        StatusCode::OK
    }
    fn error_response(&self) -> HttpResponse {
        self.to_resp()
    }
}

impl<T: Serialize> Responder for ApiResult<T> {
    type Body = BoxBody;

    fn respond_to(self, req: &HttpRequest) -> HttpResponse {
        (&self).respond_to(req)
    }
}
impl<T: Serialize> Responder for &ApiResult<T> {
    type Body = BoxBody;

    fn respond_to(self, req: &HttpRequest) -> HttpResponse {
        self.log_to_resp(req)
    }
}

// malformed request bodies answer 200 with code 400, like everything else
pub fn json_error_handler<E: std::fmt::Display + std::fmt::Debug + 'static>(
    err: E,
    req: &HttpRequest,
) -> error::Error {
    let detail = err.to_string();
    let api = ApiResult::new().with_data(()).code(400).with_msg(detail);
    let response = api.log_to_resp(req);

    error::InternalError::from_response(err, response).into()
}

pub async fn notfound(req: HttpRequest) -> Result<HttpResponse, ActixError> {
    let api = ApiResult::new()
        .with_data(())
        .code(404)
        .with_msg("route not found");

    Ok(api.respond_to(&req))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_code_msg_data() {
        let api = ApiResult::new().with_data(7u32);
        let json = serde_json::to_string(&api).unwrap();
        assert_eq!(json, r#"{"code":200,"msg":null,"data":7}"#);

        let api: ApiError = ApiResult::new().code(400).with_msg("bad pool address");
        assert_eq!(api.msg_as_str(), "bad pool address");
    }

    #[test]
    fn from_err_maps_status_codes() {
        let api: ApiError = ApiResult::from_err(&Error::AlreadyActive);
        assert_eq!(api.code, 400);
        assert_eq!(api.msg_as_str(), "pool is already active");

        let api: ApiError = ApiResult::from_err(&Error::ReceiptTimeout("0xdead".to_string()));
        assert_eq!(api.code, 500);
    }
}
