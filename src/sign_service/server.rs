//! Axum routes for the standalone sign server.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::SignService;
use super::wire::{PongResponse, SignEnvelope};
use crate::signing::{
    BilibiliSignRequest, BilibiliSignResult, DouyinSignRequest, DouyinSignResult, SignError,
    SignResult, XhsSignRequest, XhsSignResult, ZhihuSignRequest, ZhihuSignResult,
};

type SharedService = Arc<dyn SignService>;

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/signsrv/pong", get(pong))
        .route("/signsrv/v1/xhs/sign", post(xhs_sign))
        .route("/signsrv/v1/bilibili/sign", post(bilibili_sign))
        .route("/signsrv/v1/douyin/sign", post(douyin_sign))
        .route("/signsrv/v1/zhihu/sign", post(zhihu_sign))
        .with_state(service)
}

async fn pong() -> Json<PongResponse> {
    Json(PongResponse {
        message: "pong".into(),
    })
}

async fn xhs_sign(
    State(service): State<SharedService>,
    Json(request): Json<XhsSignRequest>,
) -> Json<SignEnvelope<XhsSignResult>> {
    envelope("xhs", service.xhs_sign(request).await)
}

async fn bilibili_sign(
    State(service): State<SharedService>,
    Json(request): Json<BilibiliSignRequest>,
) -> Json<SignEnvelope<BilibiliSignResult>> {
    envelope("bilibili", service.bilibili_sign(request).await)
}

async fn douyin_sign(
    State(service): State<SharedService>,
    Json(request): Json<DouyinSignRequest>,
) -> Json<SignEnvelope<DouyinSignResult>> {
    envelope("douyin", service.douyin_sign(request).await)
}

async fn zhihu_sign(
    State(service): State<SharedService>,
    Json(request): Json<ZhihuSignRequest>,
) -> Json<SignEnvelope<ZhihuSignResult>> {
    envelope("zhihu", service.zhihu_sign(request).await)
}

fn envelope<T: Serialize>(platform: &str, result: SignResult<T>) -> Json<SignEnvelope<T>> {
    match result {
        Ok(data) => Json(SignEnvelope::success(data)),
        Err(err) => {
            log::warn!("{platform} sign failed: {err}");
            let code = match &err {
                SignError::InvalidRequest(_) => 400,
                SignError::Remote { code, .. } => *code,
                SignError::Transport(_) | SignError::Decode(_) => 500,
            };
            Json(SignEnvelope::failure(code, err.to_string()))
        }
    }
}
