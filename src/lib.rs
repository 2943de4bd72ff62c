#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod services;
pub mod workflow;

pub use config::Config;
pub use services::Services;

use config::{ConfigFairing, ServicesFairing};
use logging::LoggerFairing;
use workflow::WorkflowRegistry;

/// Build the server, with services chosen by the configuration.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(ServicesFairing)
}

/// Build the server around ready-made services.
pub fn rocket_for_services(services: Services, config: Config) -> Rocket<Build> {
    let registry = WorkflowRegistry::new(
        services.clone(),
        config.attempt_limits(),
        config.session_ttl(),
    );
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .manage(config)
        .manage(services)
        .manage(registry)
}
