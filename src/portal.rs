use crate::prelude::*;
use crate::coordinator::Source;
use crate::omnik::field::Field;
use crate::omnik::packet::Value;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

const API_PATH: &str = "/serverapi/";
const API_KEY: &str = "apitest";
const CLIENT: &str = "iPhone";

// replies {{{
#[derive(Debug, Deserialize)]
struct LoginReply {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StationList {
    #[serde(default)]
    power: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct Station {
    #[serde(rename = "stationID")]
    station_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataReply {
    income: Option<Income>,
}

/// The `income` element of a Data reply, values as the portal sent them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Income {
    #[serde(rename = "ActualPower")]
    pub actual_power: Option<String>,
    #[serde(rename = "etoday")]
    pub energy_today: Option<String>,
    #[serde(rename = "etotal")]
    pub energy_total: Option<String>,
    #[serde(rename = "TodayIncome")]
    pub income_today: Option<String>,
    #[serde(rename = "TotalIncome")]
    pub income_total: Option<String>,
}

impl Income {
    fn get(&self, field: &Field) -> Option<&str> {
        let text = match field {
            Field::ActualPower => &self.actual_power,
            Field::EnergyToday => &self.energy_today,
            Field::EnergyTotal => &self.energy_total,
            Field::IncomeToday => &self.income_today,
            Field::IncomeTotal => &self.income_total,
            _ => return None,
        };

        text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
} // }}}

/// Client for the Omnik portal's XML API.
///
/// The login token and station id are kept between cycles. A failed data
/// request throws the token away so the next cycle logs in again.
pub struct Portal {
    client: reqwest::Client,
    base: Url,
    username: String,
    password_hash: String,
    token: Option<String>,
    station_id: Option<String>,
    income: Option<Income>,
}

impl Portal {
    pub fn new(config: &config::Portal) -> Result<Self> {
        let base = Url::parse(&format!(
            "http://{}:{}{}",
            config.host(),
            config.port(),
            API_PATH
        ))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base,
            username: config.username().to_owned(),
            password_hash: Self::password_hash(config.password()),
            token: None,
            station_id: None,
            income: None,
        })
    }

    /// Lowercase hex md5 of the password; the portal never sees it in clear.
    pub fn password_hash(password: &str) -> String {
        hex::encode(Md5::digest(password.as_bytes()))
    }

    pub fn income(&self) -> Option<&Income> {
        self.income.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, method: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("method", method);
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("key", API_KEY);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, params: &[(&str, &str)]) -> Result<T> {
        debug!("portal {}: GET {}", self.base, method);

        let body = self
            .client
            .get(self.url(method, params))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        trace!("portal {}: {}", method, body);

        quick_xml::de::from_str(&body).map_err(|err| anyhow!("{} reply: {}", method, err))
    }

    async fn login(&self) -> Result<String> {
        let reply: LoginReply = self
            .get(
                "Login",
                &[
                    ("username", self.username.as_str()),
                    ("password", self.password_hash.as_str()),
                    ("client", CLIENT),
                ],
            )
            .await?;

        match reply.token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Ok(token.trim().to_owned()),
            None => bail!("login for {} returned no token", self.username),
        }
    }

    async fn station(&self, token: &str) -> Result<String> {
        let reply: StationList = self
            .get(
                "Powerstationslist",
                &[("username", self.username.as_str()), ("token", token)],
            )
            .await?;

        reply
            .power
            .into_iter()
            .find_map(|s| s.station_id.map(|id| id.trim().to_owned()))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("no stations listed for {}", self.username))
    }

    async fn data(&self, token: &str, station: &str) -> Result<Income> {
        let reply: DataReply = self
            .get(
                "Data",
                &[
                    ("username", self.username.as_str()),
                    ("stationid", station),
                    ("token", token),
                ],
            )
            .await?;

        reply
            .income
            .ok_or_else(|| anyhow!("no income in data reply for station {}", station))
    }

    async fn update(&mut self) -> Result<Income> {
        let token = match &self.token {
            Some(token) => token.clone(),
            None => {
                let token = self.login().await?;
                self.token = Some(token.clone());
                token
            }
        };

        let station = match &self.station_id {
            Some(station) => station.clone(),
            None => {
                let station = self.station(&token).await?;
                info!("portal: using station {}", station);
                self.station_id = Some(station.clone());
                station
            }
        };

        match self.data(&token, &station).await {
            Ok(income) => Ok(income),
            Err(err) => {
                self.token = None;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Source for Portal {
    fn name(&self) -> &'static str {
        "portal"
    }

    async fn refresh(&mut self) -> bool {
        self.income = None;

        match self.update().await {
            Ok(income) => {
                self.income = Some(income);
                true
            }
            Err(e) => {
                error!("Could not retrieve data from the portal at {}: {}", self.base, e);
                false
            }
        }
    }

    fn supports(&self, field: &Field) -> bool {
        matches!(
            field,
            Field::ActualPower
                | Field::EnergyToday
                | Field::EnergyTotal
                | Field::IncomeToday
                | Field::IncomeTotal
        )
    }

    fn read(&self, field: &Field) -> Option<Value> {
        let value = self.income.as_ref()?.get(field).map(Value::from_text);
        trace!("portal: {} = {:?}", field, value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_md5_hex() {
        assert_eq!(
            Portal::password_hash("secret"),
            "5ebe2294ecd0e0f08eab7690d2a6ee69"
        );
    }

    #[test]
    fn data_reply_parses() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<data>
  <income>
    <ActualPower>1234</ActualPower>
    <etoday>5.6</etoday>
    <etotal>7890.1</etotal>
    <TodayIncome>1.23</TodayIncome>
    <TotalIncome></TotalIncome>
  </income>
</data>"#;
        let reply: DataReply = quick_xml::de::from_str(xml).unwrap();
        let income = reply.income.unwrap();

        assert_eq!(income.get(&Field::ActualPower), Some("1234"));
        assert_eq!(income.get(&Field::EnergyTotal), Some("7890.1"));
        assert_eq!(income.get(&Field::IncomeTotal), None);
        assert_eq!(income.get(&Field::Temperature), None);
    }

    #[test]
    fn first_station_wins() {
        let xml = "<list><power><stationID>11</stationID></power><power><stationID>22</stationID></power></list>";
        let reply: StationList = quick_xml::de::from_str(xml).unwrap();

        assert_eq!(reply.power.len(), 2);
        assert_eq!(reply.power[0].station_id.as_deref(), Some("11"));
    }
}
