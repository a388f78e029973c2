use std::env;
use std::ffi::OsStr;
use std::path::Path;

use actix_files::NamedFile;
use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{
    error, get, http::StatusCode, middleware, post, web, App, HttpRequest, HttpResponse,
    HttpServer, Responder, Result,
};
use futures::TryStreamExt;
use log::{info, warn};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::CONFIG;
use crate::denoise::{probe, ImageInfo};
use crate::error::JobError;
use crate::lifecycle::JobService;
use crate::models::{build_path, stamped_name, DenoiseParams, FileKind, Method, Status};

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>dnserve</title>
<style>
body { font-family: Arial, sans-serif; background-color: #f0f0f0; }
.container { background: white; padding: 20px; border-radius: 5px; max-width: 540px; margin: 40px auto; }
#result { margin-top: 16px; }
</style>
</head>
<body>
<div class="container">
<h1>Image denoiser</h1>
<form id="form">
<p><input type="file" name="image" accept="image/*" required></p>
<p>Strength (1-10): <input type="number" name="strength" min="1" max="10" value="5"></p>
<p>Method:
<select name="method">
<option value="nlmeans">Non-local means</option>
<option value="bilateral">Bilateral</option>
<option value="gaussian">Gaussian</option>
</select></p>
<p><label><input type="checkbox" name="grayscale"> Convert to grayscale</label></p>
<p><button type="submit">Denoise</button></p>
</form>
<div id="result"></div>
</div>
<script>
const form = document.getElementById('form');
const result = document.getElementById('result');
form.addEventListener('submit', async (event) => {
  event.preventDefault();
  result.textContent = 'Uploading...';
  const response = await fetch('/upload', { method: 'POST', body: new FormData(form) });
  const body = await response.json();
  if (!response.ok) {
    result.textContent = body.description || 'Upload failed';
    return;
  }
  const poll = setInterval(async () => {
    const status = await (await fetch(body.status_url)).json();
    if (status.status === 'completed') {
      clearInterval(poll);
      result.innerHTML = 'Done in ' + status.process_time +
        ' &mdash; <a href="/processed/' + body.id + '">download</a>';
    } else if (status.status === 'failed') {
      clearInterval(poll);
      result.textContent = 'Failed: ' + status.message;
    } else {
      result.textContent = 'Status: ' + status.status;
    }
  }, 1000);
});
</script>
</body>
</html>
"#;

struct AppState {
    service: JobService,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: String,
    status_url: String,
    metadata: ImageInfo,
}

#[derive(Serialize)]
struct StatusResponse {
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    process_time: Option<String>,
}

#[derive(Serialize)]
enum ErrorType {
    MissingImage,
    UnsupportedMediaType,
    InvalidImage,
    PayloadTooLarge,
    InvalidParameter,
    DuplicateJob,
    QueueBusy,
    WorkerUnavailable,
    UnknownJob,
    UnknownFile,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorType,
    description: String,
}

fn build_error_response(
    status_code: StatusCode,
    error_type: ErrorType,
    description: &str,
) -> HttpResponse {
    HttpResponse::build(status_code).json(ErrorResponse {
        error: error_type,
        description: description.to_owned(),
    })
}

/// Keeps the last path component and strips everything outside a small
/// safe alphabet, so a client-supplied name can never escape the upload
/// directory.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        return "upload".to_owned();
    }

    cleaned
}

fn allowed_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

async fn read_text_field(field: &mut Field) -> Result<String> {
    let mut buffer = Vec::new();

    while let Some(chunk) = field.try_next().await? {
        buffer.extend_from_slice(&chunk);
    }

    String::from_utf8(buffer).map_err(|_| error::ErrorBadRequest("form field is not UTF-8"))
}

/// Streams the image field to the upload directory. Yields `None` if the
/// size cap was blown, in which case the partial file is removed.
async fn save_upload(field: &mut Field, stored_name: &str) -> Result<Option<()>> {
    let path = build_path(stored_name, FileKind::Original);
    let mut written = 0usize;

    let mut file = fs::File::create(&path).await?;

    while let Some(chunk) = field.try_next().await? {
        written += chunk.len();

        if written > CONFIG.max_upload_bytes {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        file.write_all(&chunk).await?;
    }

    file.flush().await?;

    Ok(Some(()))
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

#[post("/upload")]
async fn upload(data: web::Data<AppState>, mut payload: Multipart) -> Result<impl Responder> {
    let mut stored_name: Option<String> = None;
    let mut strength: u8 = 5;
    let mut method = Method::Nlmeans;
    let mut grayscale = false;

    while let Some(mut field) = payload.try_next().await? {
        let field_name = field.name().to_owned();

        match field_name.as_str() {
            "image" => {
                let supplied = field
                    .content_disposition()
                    .get_filename()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| "upload".to_owned());

                if !allowed_file(&supplied) {
                    return Ok(build_error_response(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        ErrorType::UnsupportedMediaType,
                        "Only png, jpg, jpeg, bmp, tif, tiff and webp files are accepted",
                    ));
                }

                let name = stamped_name(&supplied);

                if save_upload(&mut field, &name).await?.is_none() {
                    return Ok(build_error_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        ErrorType::PayloadTooLarge,
                        &format!(
                            "Uploads are limited to {} bytes",
                            CONFIG.max_upload_bytes
                        ),
                    ));
                }

                stored_name = Some(name);
            }
            "strength" => {
                let text = read_text_field(&mut field).await?;
                strength = match text.trim().parse() {
                    Ok(value) => value,
                    Err(_) => {
                        return Ok(build_error_response(
                            StatusCode::BAD_REQUEST,
                            ErrorType::InvalidParameter,
                            "strength must be an integer between 1 and 10",
                        ))
                    }
                };
            }
            "method" => {
                let text = read_text_field(&mut field).await?;
                method = match Method::parse(text.trim()) {
                    Some(value) => value,
                    None => {
                        return Ok(build_error_response(
                            StatusCode::BAD_REQUEST,
                            ErrorType::InvalidParameter,
                            "method must be one of nlmeans, bilateral, gaussian",
                        ))
                    }
                };
            }
            "grayscale" => {
                let text = read_text_field(&mut field).await?;
                grayscale = matches!(text.trim(), "on" | "true" | "1");
            }
            other => {
                warn!("upload: ignoring unexpected field {other:?}");
            }
        }
    }

    let Some(stored_name) = stored_name else {
        return Ok(build_error_response(
            StatusCode::BAD_REQUEST,
            ErrorType::MissingImage,
            "No image file was supplied",
        ));
    };

    let input_path = build_path(&stored_name, FileKind::Original);

    let metadata = match probe(&input_path) {
        Ok(metadata) => metadata,
        Err(err) => {
            info!("[{}] probe failed: {}", stored_name, err);
            let _ = fs::remove_file(&input_path).await;

            return Ok(build_error_response(
                StatusCode::BAD_REQUEST,
                ErrorType::InvalidImage,
                "Supplied file is not in a recognised image format",
            ));
        }
    };

    let params = DenoiseParams::new(strength, method, grayscale);
    let output_path = build_path(&stored_name, FileKind::Processed);

    let id = match data.service.submit(&input_path, &output_path, params) {
        Ok(id) => id,
        Err(JobError::QueueFull) => {
            let _ = fs::remove_file(&input_path).await;

            return Ok(build_error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorType::QueueBusy,
                "The processing queue is full, try again shortly",
            ));
        }
        Err(JobError::DuplicateJob(id)) => {
            return Ok(build_error_response(
                StatusCode::CONFLICT,
                ErrorType::DuplicateJob,
                &format!("A job named {id} already exists"),
            ));
        }
        Err(err) => {
            let _ = fs::remove_file(&input_path).await;

            return Ok(build_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorType::WorkerUnavailable,
                &err.to_string(),
            ));
        }
    };

    let response = SubmitResponse {
        status_url: format!("/status/{id}"),
        id,
        metadata,
    };

    Ok(HttpResponse::build(StatusCode::ACCEPTED).json(response))
}

#[get("/status/{job_id}")]
async fn status(data: web::Data<AppState>, job_id: web::Path<String>) -> Result<impl Responder> {
    match data.service.get_status(&job_id) {
        Some(report) => Ok(HttpResponse::Ok().json(StatusResponse {
            status: report.status,
            message: report.error,
            process_time: report
                .process_time
                .map(|elapsed| format!("{:.2}s", elapsed.as_secs_f64())),
        })),
        None => Ok(build_error_response(
            StatusCode::NOT_FOUND,
            ErrorType::UnknownJob,
            "No such job; it may have expired",
        )),
    }
}

async fn serve_file(request: &HttpRequest, filename: &str, kind: FileKind) -> Result<HttpResponse> {
    // Stored names only ever contain the sanitized alphabet.
    if filename != sanitize_filename(filename) {
        return Ok(build_error_response(
            StatusCode::NOT_FOUND,
            ErrorType::UnknownFile,
            "No such file",
        ));
    }

    let attachment = matches!(kind, FileKind::Processed);
    let path = build_path(filename, kind);

    let file = match NamedFile::open_async(&path).await {
        Ok(file) => file,
        Err(_) => {
            return Ok(build_error_response(
                StatusCode::NOT_FOUND,
                ErrorType::UnknownFile,
                "No such file",
            ))
        }
    };

    let file = if attachment {
        file.set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename.to_owned())],
        })
    } else {
        file
    };

    Ok(file.into_response(request))
}

#[get("/uploads/{filename}")]
async fn serve_original(
    request: HttpRequest,
    filename: web::Path<String>,
) -> Result<impl Responder> {
    serve_file(&request, &filename, FileKind::Original).await
}

#[get("/processed/{filename}")]
async fn serve_processed(
    request: HttpRequest,
    filename: web::Path<String>,
) -> Result<impl Responder> {
    serve_file(&request, &filename, FileKind::Processed).await
}

fn get_port() -> u16 {
    env::var("PORT")
        .map_err(|_| ())
        .and_then(|string| string.parse::<u16>().map_err(|_| ()))
        .unwrap_or(3800)
}

pub async fn start_web_server(service: JobService) -> std::io::Result<()> {
    let app_state = web::Data::new(AppState { service });
    let port = get_port();

    info!("starting web server at 0.0.0.0:{port}...");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .service(index)
            .service(upload)
            .service(status)
            .service(serve_original)
            .service(serve_processed)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::store::JobStore;
    use actix_web::{body::to_bytes, test as actix_test};
    use std::sync::Arc;

    fn test_state() -> (web::Data<AppState>, crate::queue::QueueReceiver) {
        let (tx, rx) = queue::bounded(8);
        let service = JobService::new(Arc::new(JobStore::new()), tx);
        (web::Data::new(AppState { service }), rx)
    }

    #[test]
    fn sanitize_filename_flattens_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(r"C:\photos\cat.png"), "cat.png");
        assert_eq!(sanitize_filename("my photo (1).png"), "myphoto1.png");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn allowed_file_checks_the_extension() {
        assert!(allowed_file("cat.png"));
        assert!(allowed_file("cat.JPG"));
        assert!(!allowed_file("cat.gif"));
        assert!(!allowed_file("cat"));
    }

    #[actix_web::test]
    async fn index_serves_the_upload_form() {
        let (state, _rx) = test_state();
        let app = actix_test::init_service(App::new().app_data(state).service(index)).await;

        let response = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/").to_request()).await;
        assert!(response.status().is_success());
    }

    #[actix_web::test]
    async fn status_of_an_unknown_job_is_404() {
        let (state, _rx) = test_state();
        let app = actix_test::init_service(App::new().app_data(state).service(status)).await;

        let request = actix_test::TestRequest::get().uri("/status/1_gone.png").to_request();
        let response = actix_test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn status_reports_a_pending_job() {
        let (state, _rx) = test_state();

        state
            .service
            .submit(
                &build_path("1_cat.png", FileKind::Original),
                &build_path("1_cat.png", FileKind::Processed),
                DenoiseParams::new(5, Method::Gaussian, false),
            )
            .unwrap();

        let app = actix_test::init_service(App::new().app_data(state.clone()).service(status)).await;

        let request = actix_test::TestRequest::get().uri("/status/1_cat.png").to_request();
        let response = actix_test::call_service(&app, request).await;
        assert!(response.status().is_success());

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("message").is_none());
    }
}
