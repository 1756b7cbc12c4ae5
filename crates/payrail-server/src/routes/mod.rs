use actix_web::web;

pub mod catalog;
pub mod health;
pub mod orders;
pub mod verify;
pub mod webhooks;

/// Mount every route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(orders::configure)
        .configure(verify::configure)
        .configure(catalog::configure)
        .configure(webhooks::configure);
}
