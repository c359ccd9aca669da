use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub mpesa_base_url: String,
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_shortcode: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            mpesa_base_url: env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            mpesa_consumer_key: env::var("MPESA_CONSUMER_KEY")?,
            mpesa_consumer_secret: env::var("MPESA_CONSUMER_SECRET")?,
            mpesa_shortcode: env::var("MPESA_SHORTCODE")?,
            mpesa_passkey: env::var("MPESA_PASSKEY")?,
            mpesa_callback_url: env::var("MPESA_CALLBACK_URL")?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL is empty");
        }
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.mpesa_shortcode.is_empty() || self.mpesa_passkey.is_empty() {
            anyhow::bail!("M-PESA shortcode and passkey must be configured");
        }
        reqwest::Url::parse(&self.mpesa_base_url)
            .map_err(|_| anyhow::anyhow!("MPESA_BASE_URL is not a valid URL"))?;
        reqwest::Url::parse(&self.mpesa_callback_url)
            .map_err(|_| anyhow::anyhow!("MPESA_CALLBACK_URL is not a valid URL"))?;

        Ok(())
    }
}
