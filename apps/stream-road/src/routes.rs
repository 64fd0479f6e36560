use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    debug_stats, get_stream, gps_health, gps_history, gps_status, instance_health, latest_gps,
    list_streams, render_metrics, submit_gps, GpsState, InstanceState,
};
use crate::websocket::websocket_handler;

/// Signaling endpoint plus the query surface of one broker instance.
pub fn instance_router(state: InstanceState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/streams", get(list_streams))
        .route("/api/stream/:id", get(get_stream))
        .route("/health", get(instance_health))
        .route("/metrics", get(render_metrics))
        .route("/debug/stats", get(debug_stats))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub fn gps_input_router(state: GpsState) -> Router {
    Router::new()
        .route("/gps", post(submit_gps))
        .route("/health", get(gps_health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub fn gps_output_router(state: GpsState) -> Router {
    Router::new()
        .route("/gps/latest", get(latest_gps))
        .route("/gps/history", get(gps_history))
        .route("/gps/status", get(gps_status))
        .route("/health", get(gps_health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{self, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use crate::bridge::LocalBridge;
    use crate::broker::BrokerInstance;
    use crate::gps::GpsStore;
    use crate::protocol::{Metadata, SessionSummary};
    use crate::session::CollisionPolicy;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn gps_pair() -> (Router, Router) {
        let store = Arc::new(GpsStore::new(10).unwrap());
        let input = gps_input_router(GpsState {
            store: store.clone(),
            port: 5002,
            label: "GPS Input Server",
        });
        let output = gps_output_router(GpsState {
            store,
            port: 5004,
            label: "GPS Output Server",
        });
        (input, output)
    }

    #[tokio::test]
    async fn stream_queries_cover_local_and_bridged_sessions() {
        let producer_edge = Arc::new(BrokerInstance::new("producer-edge", CollisionPolicy::Overwrite));
        let consumer_edge = Arc::new(BrokerInstance::new("consumer-edge", CollisionPolicy::Overwrite));
        LocalBridge::link(&producer_edge, &consumer_edge);

        let (producer, _rx) = producer_edge.connect();
        producer_edge
            .register_producer(producer, Some("cam-1".into()), Metadata::new())
            .unwrap();

        let app = instance_router(InstanceState {
            broker: consumer_edge.clone(),
            metrics: None,
        });

        let response = app.clone().oneshot(get_request("/api/streams")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed: Vec<SessionSummary> =
            serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "cam-1");
        assert!(listed[0].bridged);

        let response = app.clone().oneshot(get_request("/api/stream/cam-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["producerId"], json!(producer.to_string()));
        assert_eq!(body["consumerCount"], json!(0));

        let response = app.clone().oneshot(get_request("/api/stream/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Stream not found"}));
    }

    #[tokio::test]
    async fn health_stats_and_metrics_without_recorder() {
        let broker = Arc::new(BrokerInstance::new("viewer", CollisionPolicy::Overwrite));
        let app = instance_router(InstanceState {
            broker,
            metrics: None,
        });

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["instance"], json!("viewer"));

        let response = app.clone().oneshot(get_request("/debug/stats")).await.unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["active_connections"], json!(0));
        assert_eq!(stats["relay"]["dropped"], json!(0));

        let response = app.clone().oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn gps_reports_flow_from_input_to_output() {
        let (input, output) = gps_pair();

        let response = output.clone().oneshot(get_request("/gps/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        for i in 0..3 {
            let response = input
                .clone()
                .oneshot(post_json(
                    "/gps",
                    json!({"latitude": 10.0 + i as f64, "longitude": 0, "heading": i}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["success"], json!(true));
        }

        let response = output.clone().oneshot(get_request("/gps/latest")).await.unwrap();
        let latest = body_json(response).await;
        assert_eq!(latest["data"]["latitude"], json!(12.0));
        assert_eq!(latest["data"]["heading"], json!(2));

        let response = output
            .clone()
            .oneshot(get_request("/gps/history?limit=2"))
            .await
            .unwrap();
        let history = body_json(response).await;
        assert_eq!(history["count"], json!(2));
        assert_eq!(history["data"][0]["latitude"], json!(11.0));

        let response = output
            .clone()
            .oneshot(get_request("/gps/history?limit=abc"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["count"], json!(3));

        let response = output.clone().oneshot(get_request("/gps/status")).await.unwrap();
        let status = body_json(response).await;
        assert_eq!(status["hasData"], json!(true));
        assert_eq!(status["historyCount"], json!(3));
        assert_eq!(status["port"], json!(5004));
        assert_eq!(status["lastUpdate"], latest["data"]["timestamp"]);
    }

    #[tokio::test]
    async fn gps_report_without_coordinates_is_rejected() {
        let (input, output) = gps_pair();

        let response = input
            .clone()
            .oneshot(post_json("/gps", json!({"latitude": 1.5})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("latitude and longitude are required"));

        let response = output.clone().oneshot(get_request("/gps/status")).await.unwrap();
        let status = body_json(response).await;
        assert_eq!(status["hasData"], json!(false));
        assert_eq!(status["lastUpdate"], Value::Null);

        let response = input.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(
            body_json(response).await["status"],
            json!("GPS Input Server Running")
        );
    }
}
