use crate::clash::client::{ClashClient, Fetched};
use crate::clash::types::RankingList;
use crate::error::AppError;

impl ClashClient {
    /// Get the builder base player rankings of a location id, or `global`.
    pub async fn get_builder_base_rankings(
        &self,
        location: &str,
    ) -> Result<Fetched<RankingList>, AppError> {
        let url = format!(
            "{}/locations/{}/rankings/players-builder-base",
            self.base_url(),
            urlencoding::encode(location)
        );

        self.get(&url).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use crate::clash::client::tests::test_client;

    #[tokio::test]
    async fn rankings_are_parsed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/locations/global/rankings/players-builder-base");
                then.status(200).json_body(json!({"items": [
                    {"tag": "#AAA", "name": "first", "rank": 1, "previousRank": 2, "builderBaseTrophies": 6100},
                    {"tag": "#BBB", "name": "second", "rank": 2, "builderBaseTrophies": 6050}
                ]}));
            })
            .await;

        let client = test_client(&server.base_url());
        let rankings = client.get_builder_base_rankings("global").await.unwrap().data;

        mock.assert_async().await;
        assert_eq!(rankings.items.len(), 2);
        assert_eq!(rankings.items[0].previous_rank, Some(2));
        assert_eq!(rankings.items[1].previous_rank, None);
    }
}
