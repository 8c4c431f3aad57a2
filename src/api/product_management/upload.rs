use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::api::product_management::models::{
    all_tags, find_or_create_tag, NewProduct, NewProductTag, Product, Tag,
};
use crate::api::user_management::models::{User, UserLoggedIn};
use crate::db::DbConn;
use crate::error::MarketError;
use crate::money::parse_cents;
use crate::pages::Page;
use crate::schema::{product_tags, products, tags};
use crate::settings::Settings;
use crate::storage;
use crate::validation::{
    sanitize_file_name, validate_description, validate_image, validate_product_file,
    validate_tag_name, validate_title, MAX_PRODUCT_FILES,
};
use diesel::prelude::*;
use diesel::PgConnection;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::ContentType;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::tokio::{fs, task};
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;

#[derive(FromForm)]
pub struct UploadForm<'r> {
    title: String,
    description: Option<String>,
    price: String,
    image: Option<TempFile<'r>>,
    files: Vec<TempFile<'r>>,
    existing_tags: Vec<i32>,
    new_tags_list: Option<String>,
}

/// Form values echoed back when the upload is rejected.
#[derive(Serialize, Default)]
struct UploadValues {
    title: String,
    description: String,
    price: String,
    new_tags_list: String,
    existing_tags: Vec<i32>,
}

#[derive(Serialize)]
struct UploadPage {
    tags: Vec<Tag>,
    values: UploadValues,
}

/// Everything about an upload that passed validation.
struct CheckedUpload {
    title: String,
    description: String,
    price_cents: i64,
    image_extension: &'static str,
    tag_ids: Vec<i32>,
    new_tags: Vec<String>,
}

async fn upload_page(
    conn: &DbConn,
    user: &User,
    values: UploadValues,
    error: Option<String>,
) -> Template {
    let tags = conn.run(|c| all_tags(c)).await.unwrap_or_else(|err| {
        tracing::error!(error = %err, "Couldn't load tags");
        Vec::new()
    });

    let page = Page::new(Some(user), UploadPage { tags, values });
    match error {
        Some(error) => page.error(error).render("upload"),
        None => page.render("upload"),
    }
}

#[get("/upload")]
pub(crate) async fn show_upload(
    user: UserLoggedIn,
    conn: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let error = flash.map(|flash| flash.message().to_string());
    upload_page(&conn, &user.0, UploadValues::default(), error).await
}

fn raw_file_name(file: &TempFile<'_>) -> String {
    file.raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default()
}

fn image_extension(content_type: &ContentType) -> Option<&'static str> {
    if content_type.is_jpeg() {
        Some("jpg")
    } else if content_type.is_png() {
        Some("png")
    } else if content_type.is_gif() {
        Some("gif")
    } else if content_type.is_webp() {
        Some("webp")
    } else {
        None
    }
}

/// Comma separated tag names; blanks are skipped, duplicates collapse
/// case-insensitively.
fn parse_new_tags(raw: &str) -> Result<Vec<String>, MarketError> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        validate_tag_name(name)?;
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Browsers submit an empty part for a file input left blank.
fn is_blank(file: &TempFile<'_>) -> bool {
    file.len() == 0 && raw_file_name(file).is_empty()
}

fn check(upload: &UploadForm<'_>) -> Result<CheckedUpload, MarketError> {
    let title = upload.title.trim().to_string();
    validate_title(&title)?;
    let description = upload
        .description
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();
    validate_description(&description)?;
    let price_cents = parse_cents(&upload.price)?;

    let image = upload
        .image
        .as_ref()
        .filter(|image| !is_blank(image))
        .ok_or_else(|| MarketError::Validation("Product image is missing".to_string()))?;
    validate_image(image.content_type(), image.len())?;
    let image_extension = image
        .content_type()
        .and_then(image_extension)
        .ok_or_else(|| {
            MarketError::Validation("Image must be a JPEG, PNG, GIF or WebP file".to_string())
        })?;

    let files: Vec<&TempFile<'_>> = upload.files.iter().filter(|f| !is_blank(f)).collect();
    if files.is_empty() {
        return Err(MarketError::Validation(
            "Add at least one product file".to_string(),
        ));
    }
    if files.len() > MAX_PRODUCT_FILES {
        return Err(MarketError::Validation(format!(
            "Too many files (at most {})",
            MAX_PRODUCT_FILES
        )));
    }
    for file in files {
        validate_product_file(&raw_file_name(file), file.len())?;
    }

    let mut tag_ids = upload.existing_tags.clone();
    tag_ids.sort_unstable();
    tag_ids.dedup();

    Ok(CheckedUpload {
        title,
        description,
        price_cents,
        image_extension,
        tag_ids,
        new_tags: parse_new_tags(upload.new_tags_list.as_deref().unwrap_or_default())?,
    })
}

fn upload_stamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Copies the product files into `staging`, renaming clashes.
async fn stage_files(files: &mut [TempFile<'_>], staging: &Path) -> Result<(), MarketError> {
    fs::create_dir_all(staging).await?;

    let mut used = HashSet::new();
    for (i, file) in files.iter_mut().enumerate() {
        if is_blank(file) {
            continue;
        }
        let mut name = sanitize_file_name(&raw_file_name(file));
        if !used.insert(name.to_lowercase()) {
            name = format!("{}_{}", i, name);
            used.insert(name.to_lowercase());
        }
        file.copy_to(staging.join(&name)).await?;
    }
    Ok(())
}

async fn bundle(staging: PathBuf, destination: PathBuf) -> Result<usize, MarketError> {
    task::spawn_blocking(move || storage::bundle_directory(&staging, &destination))
        .await
        .map_err(|err| MarketError::Internal(err.to_string()))?
}

async fn remove_upload(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "Couldn't remove upload");
        }
    }
}

fn insert_product(
    c: &PgConnection,
    new_product: NewProduct,
    tag_ids: Vec<i32>,
    new_tags: Vec<String>,
) -> Result<Product, MarketError> {
    c.transaction::<_, MarketError, _>(|| {
        let product = diesel::insert_into(products::table)
            .values(&new_product)
            .get_result::<Product>(c)?;

        // Ids that do not name a tag are ignored.
        let mut ids = tags::table
            .filter(tags::id.eq_any(&tag_ids))
            .select(tags::id)
            .load::<i32>(c)?;
        for name in &new_tags {
            let id = find_or_create_tag(c, name)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let links: Vec<NewProductTag> = ids
            .into_iter()
            .map(|tag_id| NewProductTag {
                product_id: product.id,
                tag_id,
            })
            .collect();
        if !links.is_empty() {
            diesel::insert_into(product_tags::table)
                .values(&links)
                .execute(c)?;
        }

        Ok(product)
    })
}

async fn store(
    upload: &mut UploadForm<'_>,
    checked: CheckedUpload,
    user_id: i32,
    conn: &DbConn,
    upload_dir: &Path,
) -> Result<Product, MarketError> {
    fs::create_dir_all(upload_dir).await?;

    let stamp = upload_stamp();
    let staging = upload_dir.join(storage::temp_dir_name(stamp));
    let bundle_name = storage::bundle_name(stamp);
    let image_name = storage::image_name(stamp, checked.image_extension);
    let bundle_path = upload_dir.join(&bundle_name);
    let image_path = upload_dir.join(&image_name);

    let bundled = match stage_files(&mut upload.files, &staging).await {
        Ok(()) => bundle(staging.clone(), bundle_path.clone()).await,
        Err(err) => Err(err),
    };
    if let Err(err) = fs::remove_dir_all(&staging).await {
        tracing::warn!(dir = %staging.display(), error = %err, "Couldn't remove staging directory");
    }
    let file_count = match bundled {
        Ok(count) => count,
        Err(err) => {
            remove_upload(&bundle_path).await;
            return Err(err);
        }
    };

    let saved_image = match upload.image.as_mut() {
        Some(image) => image.copy_to(&image_path).await.map_err(MarketError::from),
        None => Err(MarketError::Validation("Product image is missing".to_string())),
    };
    if let Err(err) = saved_image {
        remove_upload(&bundle_path).await;
        remove_upload(&image_path).await;
        return Err(err);
    }

    let new_product = NewProduct {
        title: checked.title,
        description: checked.description,
        price_cents: checked.price_cents,
        file_path: bundle_name,
        image_path: Some(image_name),
        user_id,
    };
    let (tag_ids, new_tags) = (checked.tag_ids, checked.new_tags);

    match conn
        .run(move |c| insert_product(c, new_product, tag_ids, new_tags))
        .await
    {
        Ok(product) => {
            tracing::info!(
                product_id = product.id,
                user_id,
                files = file_count,
                "product uploaded"
            );
            Ok(product)
        }
        Err(err) => {
            remove_upload(&bundle_path).await;
            remove_upload(&image_path).await;
            Err(err)
        }
    }
}

#[post("/upload", data = "<form>")]
pub(crate) async fn upload(
    form: Form<UploadForm<'_>>,
    user: UserLoggedIn,
    conn: DbConn,
    settings: &State<Settings>,
) -> Result<Flash<Redirect>, Template> {
    let mut upload = form.into_inner();
    let values = UploadValues {
        title: upload.title.clone(),
        description: upload.description.clone().unwrap_or_default(),
        price: upload.price.clone(),
        new_tags_list: upload.new_tags_list.clone().unwrap_or_default(),
        existing_tags: upload.existing_tags.clone(),
    };

    let checked = match check(&upload) {
        Ok(checked) => checked,
        Err(err) => {
            return Err(upload_page(&conn, &user.0, values, Some(err.public_message())).await)
        }
    };

    match store(&mut upload, checked, user.0.id, &conn, &settings.upload_dir()).await {
        Ok(product) => Ok(Flash::success(
            Redirect::to("/profile"),
            format!("\"{}\" is now on sale.", product.title),
        )),
        Err(err) => {
            if err.status().code >= 500 {
                tracing::error!(error = %err, user_id = user.0.id, "upload failed");
            }
            Err(upload_page(&conn, &user.0, values, Some(err.public_message())).await)
        }
    }
}
