// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::path::PathBuf;
use std::sync::Arc;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::Header;
use rocket::{options, routes, Build, Request, Response, Rocket};

use super::routes;
use crate::config::TagConfig;
use crate::store::TagStore;

/// State shared by every API route
pub struct ApiState {
    pub store: Arc<dyn TagStore>,
    /// Configured tags, listed by `/all_registers` in configuration order
    pub registers: Vec<TagConfig>,
}

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, PUT, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

#[options("/<_path..>")]
async fn options(_path: PathBuf) -> Result<(), std::io::Error> {
    Ok(())
}

/// Build the Rocket instance serving the tag API
///
/// The caller provides the figment (address, port, identity, log level) so that
/// the daemon and the tests can configure it independently.
pub fn build_rocket(figment: Figment, state: ApiState) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(CORS)
        .mount(
            "/",
            routes![
                options,
                routes::all_registers,
                routes::get_register,
                routes::put_register,
                routes::get_tag,
                routes::put_tag,
                routes::healthcheck,
            ],
        )
        .manage(state)
}
