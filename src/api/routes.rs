// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use log::{debug, error, info, warn};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, put, State};

use super::server::ApiState;
use crate::store::{DataPoint, StoreError};

/// Value used for tags that could not be read in `/all_registers`
pub const UNREADABLE_VALUE: f64 = -1.0;

fn store_status(err: StoreError, key: &str) -> Status {
    match err {
        StoreError::NotFound(_) => {
            warn!("Could not find datapoint {}", key);
            Status::NotFound
        }
        other => {
            error!("Datapoint {} unavailable: {}", key, other);
            Status::InternalServerError
        }
    }
}

/// Pick `value`, falling back to `val`, and parse it
fn parse_value(value: Option<&str>, val: Option<&str>) -> Result<f64, Status> {
    let raw = value
        .filter(|raw| !raw.is_empty())
        .or(val.filter(|raw| !raw.is_empty()))
        .ok_or(Status::BadRequest)?;
    let parsed = raw.trim().parse::<f64>().map_err(|err| {
        warn!("Rejecting value {:?}: {}", raw, err);
        Status::BadRequest
    })?;
    if !parsed.is_finite() {
        warn!("Rejecting non-finite value {:?}", raw);
        return Err(Status::BadRequest);
    }
    Ok(parsed)
}

#[get("/all_registers")]
pub fn all_registers(state: &State<ApiState>) -> Json<Vec<DataPoint>> {
    let registers = state
        .registers
        .iter()
        .map(|register| match state.store.get_by_tag(&register.tag) {
            Ok(datapoint) => datapoint,
            Err(err) => {
                error!("Unable to get register {}: {}", register.tag, err);
                DataPoint {
                    tag: register.tag.clone(),
                    description: register.description.clone(),
                    address: register.address.clone(),
                    datatype: register.datatype.clone(),
                    value: UNREADABLE_VALUE,
                    last_update: String::new(),
                }
            }
        })
        .collect();
    Json(registers)
}

#[get("/register/<address>")]
pub fn get_register(address: &str, state: &State<ApiState>) -> Result<Json<DataPoint>, Status> {
    let datapoint = state
        .store
        .get_by_address(address)
        .map_err(|err| store_status(err, address))?;
    debug!("GET /register/{} -> {:?}", address, datapoint);
    Ok(Json(datapoint))
}

#[put("/register/<address>?<value>&<val>")]
pub fn put_register(
    address: &str,
    value: Option<&str>,
    val: Option<&str>,
    state: &State<ApiState>,
) -> Result<Json<DataPoint>, Status> {
    let value = parse_value(value, val)?;
    info!("PUT /register/{} value {}", address, value);
    state
        .store
        .set_value(address, value)
        .map_err(|err| store_status(err, address))?;
    get_register(address, state)
}

#[get("/tag/<name>")]
pub fn get_tag(name: &str, state: &State<ApiState>) -> Result<Json<DataPoint>, Status> {
    let datapoint = state
        .store
        .get_by_tag(name)
        .map_err(|err| store_status(err, name))?;
    debug!("GET /tag/{} -> {:?}", name, datapoint);
    Ok(Json(datapoint))
}

#[put("/tag/<name>?<value>&<val>")]
pub fn put_tag(
    name: &str,
    value: Option<&str>,
    val: Option<&str>,
    state: &State<ApiState>,
) -> Result<Json<DataPoint>, Status> {
    let value = parse_value(value, val)?;
    info!("PUT /tag/{} value {}", name, value);
    state
        .store
        .set_by_tag(name, value)
        .map_err(|err| store_status(err, name))?;
    get_tag(name, state)
}

#[get("/healthcheck")]
pub fn healthcheck(state: &State<ApiState>) -> Status {
    match state.store.healthcheck() {
        Ok(()) => Status::Ok,
        Err(err) => {
            error!("Unable to open database table: {}", err);
            Status::FailedDependency
        }
    }
}
