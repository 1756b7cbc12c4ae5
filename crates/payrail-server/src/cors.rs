use actix_cors::Cors;
use actix_web::http::header;

/// Build the CORS middleware. With no configured origins only localhost
/// (any port) is allowed.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin = origin.to_str().unwrap_or("");
            if allowed.is_empty() {
                origin == "http://localhost" || origin.starts_with("http://localhost:")
            } else {
                allowed.iter().any(|a| a == origin)
            }
        })
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .max_age(3600)
}
