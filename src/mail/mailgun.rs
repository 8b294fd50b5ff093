use async_trait::async_trait;
use serde::Deserialize;

use super::{MailAgent, MailError, Member, NewList, NewMember, OutboundMessage};

const API_BASE: &str = "https://api.mailgun.net/v3";

pub struct MailgunAgent {
    http: reqwest::Client,
    api_key: String,
    domain: String,
}

#[derive(Deserialize)]
struct MembersPage {
    items: Vec<MemberItem>,
}

#[derive(Deserialize)]
struct MemberItem {
    address: String,
    #[serde(default)]
    subscribed: bool,
}

#[derive(Deserialize)]
struct MemberEnvelope {
    member: MemberItem,
}

impl MailgunAgent {
    pub fn new(http: reqwest::Client, api_key: String, domain: String) -> Self {
        Self {
            http,
            api_key,
            domain,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth("api", Some(self.api_key.clone()))
    }
}

#[async_trait]
impl MailAgent for MailgunAgent {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn get_list(&self, address: &str) -> Result<Option<()>, MailError> {
        let resp = self
            .request(reqwest::Method::GET, format!("{API_BASE}/lists/{address}"))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        check(resp).await.map(|_| Some(()))
    }

    async fn create_list(&self, list: &NewList) -> Result<(), MailError> {
        let mut form = vec![
            ("address", list.address.clone()),
            ("access_level", list.access_level.clone()),
            ("reply_preference", list.reply_preference.clone()),
        ];
        if let Some(name) = &list.name {
            form.push(("name", name.clone()));
        }
        if let Some(description) = &list.description {
            form.push(("description", description.clone()));
        }

        let resp = self
            .request(reqwest::Method::POST, format!("{API_BASE}/lists"))
            .form(&form)
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn add_member(&self, list_address: &str, member: &NewMember) -> Result<(), MailError> {
        let mut form = vec![("address", member.address.clone())];
        if let Some(vars) = &member.vars {
            form.push(("vars", vars.to_string()));
        }

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{API_BASE}/lists/{list_address}/members"),
            )
            .form(&form)
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn list_members(&self, list_address: &str) -> Result<Vec<Member>, MailError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{API_BASE}/lists/{list_address}/members"),
            )
            .send()
            .await?;
        let page: MembersPage = check(resp).await?.json().await?;
        Ok(page
            .items
            .into_iter()
            .map(|item| Member {
                address: item.address,
                subscribed: item.subscribed,
            })
            .collect())
    }

    async fn get_member(
        &self,
        list_address: &str,
        address: &str,
    ) -> Result<Option<Member>, MailError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{API_BASE}/lists/{list_address}/members/{address}"),
            )
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let envelope: MemberEnvelope = check(resp).await?.json().await?;
        Ok(Some(Member {
            address: envelope.member.address,
            subscribed: envelope.member.subscribed,
        }))
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let form = vec![
            ("from", message.from.clone()),
            ("to", message.to.clone()),
            ("subject", message.subject.clone()),
            ("html", message.html.clone()),
            ("h:Reply-To", message.reply_to.clone()),
        ];

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{API_BASE}/{}/messages", self.domain),
            )
            .form(&form)
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, MailError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message: String = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(512)
        .collect();
    Err(MailError::Status {
        code: status.as_u16(),
        message,
    })
}
