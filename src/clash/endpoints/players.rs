use crate::clash::client::{ClashClient, Fetched};
use crate::clash::tag;
use crate::clash::types::PlayerDto;
use crate::error::AppError;

impl ClashClient {
    /// Get a player profile by tag, with the response cache age.
    pub async fn get_player(&self, player_tag: &str) -> Result<Fetched<PlayerDto>, AppError> {
        let url = format!("{}/players/{}", self.base_url(), tag::encode(player_tag));

        self.get(&url).await.map_err(|e| {
            if e.is_not_found() {
                AppError::Conversion(format!("Player {} not found", tag::normalize(player_tag)))
            } else {
                e
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use crate::clash::client::tests::test_client;
    use crate::error::AppError;

    #[tokio::test]
    async fn get_player_returns_profile_and_cache_age() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path_contains("/players/")
                    .header("authorization", "Bearer test-key");
                then.status(200)
                    .header("cache-control", "public max-age=42")
                    .json_body(json!({
                        "tag": "#2PP",
                        "name": "Builder",
                        "builderHallLevel": 10,
                        "builderBaseTrophies": 5012,
                        "bestBuilderBaseTrophies": 5300,
                        "builderBaseLeague": {"id": 44000036, "name": "Ruby League I"},
                        "legendStatistics": {
                            "previousBuilderBaseSeason": {"id": "2024-01", "rank": 12, "trophies": 5400}
                        },
                        "achievements": [{"name": "Champion Builder", "value": 5300}]
                    }));
            })
            .await;

        let client = test_client(&server.base_url());
        let player = client.get_player("2pp").await.unwrap();

        mock.assert_async().await;
        assert_eq!(player.max_age, Some(42));
        assert_eq!(player.data.name, "Builder");
        assert_eq!(player.data.builder_base_trophies, Some(5012));
        assert_eq!(player.data.achievement("Champion Builder"), 5300);
    }

    #[tokio::test]
    async fn unknown_player_is_a_conversion_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/players/");
                then.status(404).json_body(json!({"reason": "notFound"}));
            })
            .await;

        let client = test_client(&server.base_url());
        let err = client.get_player("#NOPE").await.unwrap_err();
        assert!(matches!(err, AppError::Conversion(msg) if msg.contains("#N0PE")));
    }

    #[tokio::test]
    #[ignore = "API Key required"]
    async fn get_player_works() {
        dotenvy::dotenv().ok();
        let key = std::env::var("COC_API_TOKEN").unwrap();
        let client = crate::clash::ClashClient::new(
            "https://api.clashofclans.com/v1",
            key,
            nonzero_ext::nonzero!(10_u32),
            crate::clash::RequestMetrics::new("test"),
        );

        let player = client.get_player("#Y0URPG2G8").await.unwrap();
        assert_eq!(player.data.tag, "#Y0URPG2G8");
    }
}
