//! Sign-in, registration and the saved-address book.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;

use super::error::Result;
use super::session::{self, keys, Level};
use super::{flash_redirect, login_redirect, AppState};
use crate::domain::aggregates::User;
use crate::services::{NewAddress, Registration};
use crate::EcommerceError;

const ADDRESSES_PATH: &str = "/accounts/addresses";

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

fn with_next(path: &str, next: Option<&str>) -> String {
    match next {
        Some(next) if next.starts_with('/') => format!("{path}?next={next}"),
        _ => path.to_string(),
    }
}

/// Binds the session to `user` and moves the guest cart over.
async fn sign_in(state: &AppState, session: &Session, user: &User) -> Result<()> {
    let mut guest = session::guest_cart(session).await?;
    let merged = state.carts.merge_on_login(user.id, &mut guest).await?;
    session.cycle_id().await?;
    session.insert(keys::USER_ID, user.id).await?;
    session::save_guest_cart(session, &guest).await?;
    tracing::info!(user_id = %user.id, merged, "signed in");
    Ok(())
}

pub async fn login_page(session: Session, Query(query): Query<NextQuery>) -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "next": session::safe_next(query.next.as_deref()),
        "messages": session::take_flashes(&session).await?,
    })))
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<NextQuery>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let next = form.next.as_deref().or(query.next.as_deref());
    let user = match state.accounts.authenticate(&form.email, &form.password).await {
        Ok(user) => user,
        Err(EcommerceError::InvalidCredentials) => {
            let back = with_next("/accounts/login", next);
            return flash_redirect(&session, Level::Error, EcommerceError::InvalidCredentials.to_string(), &back).await;
        }
        Err(e) => return Err(e.into()),
    };
    sign_in(&state, &session, &user).await?;
    Ok(Redirect::to(session::safe_next(next)).into_response())
}

pub async fn register_page(session: Session, Query(query): Query<NextQuery>) -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "next": session::safe_next(query.next.as_deref()),
        "password_min_length": 8,
        "messages": session::take_flashes(&session).await?,
    })))
}

pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<NextQuery>,
    Form(form): Form<Registration>,
) -> Result<Response> {
    let next = query.next.as_deref();
    let user = match state.accounts.register(form).await {
        Ok(user) => user,
        Err(e @ (EcommerceError::EmailTaken | EcommerceError::Validation(_))) => {
            let back = with_next("/accounts/register", next);
            return flash_redirect(&session, Level::Error, e.to_string(), &back).await;
        }
        Err(e) => return Err(e.into()),
    };
    sign_in(&state, &session, &user).await?;
    session::flash(&session, Level::Success, "Your account has been created.").await?;
    Ok(Redirect::to(session::safe_next(next)).into_response())
}

pub async fn logout(session: Session) -> Result<Redirect> {
    session.flush().await?;
    Ok(Redirect::to("/"))
}

pub async fn addresses(State(state): State<AppState>, session: Session) -> Result<Response> {
    let Some(user_id) = session::user_id(&session).await? else {
        return Ok(login_redirect(ADDRESSES_PATH));
    };
    let addresses = state.accounts.addresses(user_id).await?;
    Ok(Json(json!({
        "addresses": addresses,
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

pub async fn add_address(State(state): State<AppState>, session: Session, Form(form): Form<NewAddress>) -> Result<Response> {
    let Some(user_id) = session::user_id(&session).await? else {
        return Ok(login_redirect(ADDRESSES_PATH));
    };
    match state.accounts.add_address(user_id, form).await {
        Ok(_) => flash_redirect(&session, Level::Success, "Address saved.", ADDRESSES_PATH).await,
        Err(e @ EcommerceError::Validation(_)) => flash_redirect(&session, Level::Error, e.to_string(), ADDRESSES_PATH).await,
        Err(e) => Err(e.into()),
    }
}
