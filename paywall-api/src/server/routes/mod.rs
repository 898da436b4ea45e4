use crate::server::ServerRouter;

mod auth;
mod comments;
mod dashboard;
mod posts;
mod purchases;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(posts::routes())
        .merge(comments::routes())
        .merge(purchases::routes())
        .merge(dashboard::routes())
        .merge(auth::routes())
}
