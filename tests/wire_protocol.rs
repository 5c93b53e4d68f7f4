use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotmarket::engine::Engine;
use slotmarket::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotmarket_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("slotmarket.wal")).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "slotmarket".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotmarket")
        .user("slotmarket")
        .password("slotmarket");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn one(client: &Client, sql: &str) -> SimpleQueryRow {
    let mut found = rows(client, sql).await;
    assert_eq!(found.len(), 1, "expected one row from {sql}");
    found.remove(0)
}

fn field(row: &SimpleQueryRow, name: &str) -> String {
    row.get(name).unwrap_or_default().to_string()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_default()
}

struct Fixture {
    provider_service_id: String,
    provider_id: String,
    slot_id: String,
}

/// One provider-service with one published 9–11AM slot on 2024-06-01.
async fn fixture(client: &Client) -> Fixture {
    let template = one(
        client,
        "INSERT INTO time_slots (start_time, end_time, duration) \
         VALUES ('9.00AM', '11.00AM', '2 hours') RETURNING *",
    )
    .await;
    let time_slot_id = field(&template, "id");

    let provider_id = Ulid::new().to_string();
    let service = one(
        client,
        &format!(
            "INSERT INTO provider_services (provider_id, service_id, hourly_rate_cents, experience) \
             VALUES ('{provider_id}', '{}', 4500, '10 years') RETURNING *",
            Ulid::new()
        ),
    )
    .await;
    let provider_service_id = field(&service, "id");

    let slot = one(
        client,
        &format!(
            "INSERT INTO slots (provider_service_id, service_date, time_slot_id) \
             VALUES ('{provider_service_id}', '2024-06-01', '{time_slot_id}') RETURNING *"
        ),
    )
    .await;
    assert_eq!(field(&slot, "start_time"), "9.00AM");
    assert_eq!(field(&slot, "hourly_rate_cents"), "4500");
    assert_eq!(field(&slot, "is_booked"), "f");
    let slot_id = field(&slot, "id");

    client
        .batch_execute(&format!("UPDATE slots SET is_available = true WHERE id = '{slot_id}'"))
        .await
        .unwrap();

    Fixture {
        provider_service_id,
        provider_id,
        slot_id,
    }
}

fn book_sql(fx: &Fixture) -> String {
    format!(
        "INSERT INTO bookings (slot_id, customer_id, provider_id, total_price_cents, booking_date) \
         VALUES ('{}', '{}', '{}', 9000, '2024-05-20') RETURNING *",
        fx.slot_id,
        Ulid::new(),
        fx.provider_id
    )
}

fn conflict_sql(fx: &Fixture, date: &str, start: &str, end: &str) -> String {
    format!(
        "SELECT * FROM slot_conflicts WHERE provider_service_id = '{}' \
         AND service_date = '{date}' AND start_time = '{start}' AND end_time = '{end}'",
        fx.provider_service_id
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_reserves_slot_and_blocks_overlaps() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    // The unbooked 9-11AM slot already occupies that date.
    let before = one(&client, &conflict_sql(&fx, "2024-06-01", "10.00AM", "12.00PM")).await;
    assert_eq!(field(&before, "is_booked"), "t");
    let other_day = one(&client, &conflict_sql(&fx, "2024-06-02", "10.00AM", "12.00PM")).await;
    assert_eq!(field(&other_day, "is_booked"), "f");

    let booking = one(&client, &book_sql(&fx)).await;
    assert_eq!(field(&booking, "status"), "Created");
    assert_eq!(field(&booking, "service_date"), "2024-06-01");
    assert_eq!(field(&booking, "duration"), "2 hours");

    let slot = one(&client, &format!("SELECT * FROM slots WHERE id = '{}'", fx.slot_id)).await;
    assert_eq!(field(&slot, "is_booked"), "t");

    let overlapping = one(&client, &conflict_sql(&fx, "2024-06-01", "10.00AM", "12.00PM")).await;
    assert_eq!(field(&overlapping, "is_booked"), "t");
    let touching = one(&client, &conflict_sql(&fx, "2024-06-01", "11.00AM", "12.00PM")).await;
    assert_eq!(field(&touching, "is_booked"), "t");
    let clear = one(&client, &conflict_sql(&fx, "2024-06-01", "1.00PM", "2.00PM")).await;
    assert_eq!(field(&clear, "is_booked"), "f");
}

#[tokio::test]
async fn second_booking_of_same_slot_is_a_conflict() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    rows(&client, &book_sql(&fx)).await;

    let other = connect(addr).await;
    let err = other.batch_execute(&book_sql(&fx)).await.unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");
}

#[tokio::test]
async fn cancelling_booking_frees_slot() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    let booking = one(&client, &book_sql(&fx)).await;
    let booking_id = field(&booking, "id");

    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'Cancelled' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();

    let slot = one(&client, &format!("SELECT * FROM slots WHERE id = '{}'", fx.slot_id)).await;
    assert_eq!(field(&slot, "is_booked"), "f");

    let cancelled = one(&client, &format!("SELECT * FROM bookings WHERE id = '{booking_id}'")).await;
    assert_eq!(field(&cancelled, "status"), "Cancelled");

    let err = client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'Confirmed' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    rows(&client, &book_sql(&fx)).await;
}

#[tokio::test]
async fn customer_bookings_listed_by_filter() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    let booking = one(&client, &book_sql(&fx)).await;
    let customer_id = field(&booking, "customer_id");

    let mine = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE customer_id = '{customer_id}' AND status = 'Created'"),
    )
    .await;
    assert_eq!(mine.len(), 1);
    assert_eq!(field(&mine[0], "id"), field(&booking, "id"));

    let none = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE customer_id = '{customer_id}' AND status = 'Completed'"),
    )
    .await;
    assert!(none.is_empty());

    let by_provider = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE provider_id = '{}'", fx.provider_id),
    )
    .await;
    assert_eq!(by_provider.len(), 1);
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    let found = client
        .query("SELECT * FROM slots WHERE id = $1", &[&fx.slot_id])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let id: &str = found[0].get("id");
    assert_eq!(id, fx.slot_id);
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    let err = client.batch_execute("SELECT * FROM nowhere").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42P01");

    let err = client
        .batch_execute(&format!("SELECT * FROM slots WHERE id = '{}'", "not-a-ulid"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22P02");

    let err = client
        .batch_execute(&format!(
            "INSERT INTO slots (provider_service_id, service_date, time_slot_id) \
             VALUES ('{}', '2024-06-01', '{}')",
            fx.provider_service_id,
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    rows(&client, &book_sql(&fx)).await;
    let err = client
        .batch_execute(&format!(
            "DELETE FROM provider_services WHERE id = '{}'",
            fx.provider_service_id
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "2BP01");
}

#[tokio::test]
async fn reviews_round_trip() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let fx = fixture(&client).await;

    for (date, text) in [("2024-07-02", "second"), ("2024-07-01", "first")] {
        client
            .batch_execute(&format!(
                "INSERT INTO reviews (provider_service_id, customer_id, review_date, comments) \
                 VALUES ('{}', '{}', '{date}', '{text}')",
                fx.provider_service_id,
                Ulid::new()
            ))
            .await
            .unwrap();
    }

    let reviews = rows(
        &client,
        &format!("SELECT * FROM reviews WHERE provider_service_id = '{}'", fx.provider_service_id),
    )
    .await;
    let comments: Vec<String> = reviews.iter().map(|r| field(r, "comments")).collect();
    assert_eq!(comments, vec!["first", "second"]);
}
