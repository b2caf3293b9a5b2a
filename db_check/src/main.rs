//! Connectivity smoke check: connects to the configured database and prints
//! the server version.

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::NoTls;

use shared::config::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::new()?;
    let dsn = settings.database_url;

    let row = if dsn.contains("sslmode=require") {
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        let connector = MakeTlsConnector::new(tls);
        let (client, connection) = tokio_postgres::connect(&dsn, connector).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {}", e);
            }
        });
        client.query_one("SELECT version()", &[]).await?
    } else {
        let (client, connection) = tokio_postgres::connect(&dsn, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {}", e);
            }
        });
        client.query_one("SELECT version()", &[]).await?
    };

    let version: String = row.get(0);
    println!("{}", version);

    Ok(())
}
