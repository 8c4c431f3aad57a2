use std::path::Path;

use crate::api::order_management::models::has_purchased;
use crate::api::product_management::models::Product;
use crate::api::user_management::models::UserLoggedIn;
use crate::db::DbConn;
use crate::error::{ErrorResponse, MarketError};
use crate::schema::products;
use crate::settings::Settings;
use crate::storage;
use crate::tokens::{guess_content_type, DownloadTokens};
use crate::validation::sanitize_file_name;
use diesel::prelude::*;
use diesel::PgConnection;
use rocket::fs::NamedFile;
use rocket::http::{ContentType, Header, Status};
use rocket::response::{self, Redirect, Responder, Response};
use rocket::{Request, State};

/// A file sent with `Content-Disposition: attachment`.
pub(crate) struct Attachment {
    file: NamedFile,
    file_name: String,
    content_type: ContentType,
}

impl Attachment {
    pub(crate) async fn open(
        path: &Path,
        file_name: &str,
        content_type: ContentType,
    ) -> Result<Attachment, ErrorResponse> {
        let file = NamedFile::open(path).await.map_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "download file missing");
            ErrorResponse::new(Status { code: 404 }, "File not found".to_string())
        })?;

        Ok(Attachment {
            file,
            file_name: sanitize_file_name(file_name),
            content_type,
        })
    }

    fn disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}

impl<'r> Responder<'r, 'static> for Attachment {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let disposition = self.disposition();
        Response::build_from(self.file.respond_to(req)?)
            .header(self.content_type)
            .header(Header::new("Content-Disposition", disposition))
            .header(Header::new("Content-Description", "File Transfer"))
            .ok()
    }
}

#[get("/download/<token>")]
pub(crate) async fn download_with_token(
    token: &str,
    tokens: &State<DownloadTokens>,
) -> Result<Attachment, ErrorResponse> {
    let info = tokens.lookup(token).ok_or_else(|| {
        ErrorResponse::new(
            Status { code: 403 },
            "Invalid or expired download link".to_string(),
        )
    })?;

    tracing::debug!(file = %info.file_name, "serving download");
    Attachment::open(&info.file_path, &info.file_name, info.content_type).await
}

enum Access {
    Granted(Product),
    Denied,
}

fn product_access(c: &PgConnection, user_id: i32, product_id: i32) -> Result<Access, MarketError> {
    let product = products::table
        .find(product_id)
        .first::<Product>(c)
        .optional()?
        .ok_or(MarketError::NotFound("product"))?;

    if product.user_id == user_id || has_purchased(c, user_id, product_id)? {
        Ok(Access::Granted(product))
    } else {
        Ok(Access::Denied)
    }
}

#[get("/secure-download?<product>")]
pub(crate) async fn secure_download(
    product: Option<i32>,
    user: UserLoggedIn,
    conn: DbConn,
    tokens: &State<DownloadTokens>,
    settings: &State<Settings>,
) -> Result<Redirect, ErrorResponse> {
    let product_id = product.ok_or_else(|| {
        ErrorResponse::new(Status { code: 400 }, "Missing product id".to_string())
    })?;
    let user_id = user.0.id;

    let product = match conn.run(move |c| product_access(c, user_id, product_id)).await? {
        Access::Granted(product) => product,
        Access::Denied => {
            return Err(ErrorResponse::new(
                Status { code: 403 },
                "You have not purchased this product".to_string(),
            ))
        }
    };

    let path = storage::resolve(&settings.upload_dir(), &product.file_path)
        .ok_or(MarketError::NotFound("product file"))?;
    let token = tokens.issue(&path)?;

    tracing::info!(user_id, product_id, "download token issued");
    Ok(Redirect::to(format!("/download/{}", token)))
}

#[get("/files/products/<id>")]
pub(crate) async fn product_file(
    id: i32,
    user: UserLoggedIn,
    conn: DbConn,
    settings: &State<Settings>,
) -> Result<Attachment, ErrorResponse> {
    let user_id = user.0.id;

    let product = match conn.run(move |c| product_access(c, user_id, id)).await? {
        Access::Granted(product) => product,
        Access::Denied => {
            return Err(ErrorResponse::new(
                Status { code: 403 },
                "Access denied".to_string(),
            ))
        }
    };

    let path = storage::resolve(&settings.upload_dir(), &product.file_path)
        .ok_or(MarketError::NotFound("product file"))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download")
        .to_string();

    Attachment::open(&path, &file_name, guess_content_type(&file_name)).await
}
