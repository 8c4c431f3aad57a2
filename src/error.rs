use rocket::response::{Responder, Response};
use rocket::{
    http::{ContentType, Status},
    response,
    serde::json::Json,
    Request,
};
use rocket_dyn_templates::Template;
use serde::Serialize;
use thiserror::Error;

#[derive(Serialize, Debug)]
pub struct ApiError {
    err: String,
}

impl ApiError {
    pub(crate) fn new(err: String) -> ApiError {
        ApiError { err }
    }
}

/// JSON error body with a status, used by the API and download routes.
#[derive(Debug)]
pub(crate) struct ErrorResponse<T = ApiError> {
    json: Json<T>,
    status: Status,
}

impl ErrorResponse<ApiError> {
    pub(crate) fn new(status: Status, err: String) -> ErrorResponse<ApiError> {
        ErrorResponse {
            json: Json(ApiError { err }),
            status,
        }
    }
}

impl<'r, T: serde::Serialize> Responder<'r, 'static> for ErrorResponse<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        Response::build_from(self.json.respond_to(req)?)
            .status(self.status)
            .header(ContentType::JSON)
            .ok()
    }
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("your cart is empty")]
    EmptyCart,

    #[error("insufficient funds: the order costs {needed}, your balance is {available}")]
    InsufficientFunds { needed: String, available: String },

    #[error("you have already purchased \"{0}\"")]
    AlreadyPurchased(String),

    #[error("you cannot buy your own product \"{0}\"")]
    OwnProduct(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("file system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("GitHub login failed: {0}")]
    OAuth(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn status(&self) -> Status {
        match self {
            MarketError::Validation(_)
            | MarketError::EmptyCart
            | MarketError::InsufficientFunds { .. }
            | MarketError::AlreadyPurchased(_)
            | MarketError::OwnProduct(_) => Status::BadRequest,
            MarketError::NotFound(_) => Status::NotFound,
            MarketError::Forbidden(_) => Status::Forbidden,
            MarketError::OAuth(_) => Status::BadGateway,
            MarketError::Database(_)
            | MarketError::Io(_)
            | MarketError::Archive(_)
            | MarketError::Mail(_)
            | MarketError::PasswordHash(_)
            | MarketError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Message that is safe to show to a visitor. Server-side failures are
    /// collapsed into a generic sentence; the details only go to the log.
    pub fn public_message(&self) -> String {
        if self.status().code >= 500 {
            "Something went wrong on our side. Please try again.".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<MarketError> for ErrorResponse {
    fn from(err: MarketError) -> Self {
        if err.status().code >= 500 {
            tracing::error!(error = %err, "request failed");
        }
        ErrorResponse::new(err.status(), err.public_message())
    }
}

#[derive(Serialize)]
struct ErrorPage {
    logged_in: bool,
    error: String,
}

/// Renders the `error` template; used by the HTML routes.
impl<'r> Responder<'r, 'static> for MarketError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.code >= 500 {
            tracing::error!(error = %self, uri = %req.uri(), "request failed");
        } else {
            tracing::debug!(error = %self, uri = %req.uri(), "request rejected");
        }

        let page = ErrorPage {
            logged_in: req.cookies().get_private("session").is_some(),
            error: self.public_message(),
        };

        Response::build_from(Template::render("error", &page).respond_to(req)?)
            .status(status)
            .ok()
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
