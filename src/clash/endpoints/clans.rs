use crate::clash::client::{ClashClient, Fetched};
use crate::clash::tag;
use crate::clash::types::ClanWarDto;
use crate::error::AppError;

impl ClashClient {
    /// Get the current war of a clan. A private war log is reported as
    /// [`AppError::PrivateWarLog`].
    pub async fn get_current_war(&self, clan_tag: &str) -> Result<Fetched<ClanWarDto>, AppError> {
        let url = format!("{}/clans/{}/currentwar", self.base_url(), tag::encode(clan_tag));

        self.get(&url).await.map_err(|e| match e {
            AppError::ClashApi { status: 403, .. } => AppError::PrivateWarLog,
            e => e,
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use crate::clash::client::tests::test_client;
    use crate::clash::types::tests::war_json;
    use crate::error::AppError;

    #[tokio::test]
    async fn get_current_war_parses_war() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/currentwar");
                then.status(200).json_body(war_json());
            })
            .await;

        let client = test_client(&server.base_url());
        let war = client.get_current_war("#CLANA").await.unwrap().data;
        assert_eq!(war.clan.name, "Alpha");
        assert_eq!(war.opponent.stars, 3);
    }

    #[tokio::test]
    async fn forbidden_war_is_private_war_log() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/currentwar");
                then.status(403).json_body(json!({"reason": "accessDenied"}));
            })
            .await;

        let client = test_client(&server.base_url());
        let err = client.get_current_war("#CLANA").await.unwrap_err();
        assert!(matches!(err, AppError::PrivateWarLog));
    }
}
