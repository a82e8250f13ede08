use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use roomslot::engine::{CancelOutcome, Rejection};
use roomslot::model::*;
use roomslot::notify::NotifyHub;
use roomslot::store::Ledger;
use roomslot::validate::{BookingRequest, NewException, NewRule, NewService, SlotQuery};
use roomslot::{Config, Engine, EngineError};

// ── Test infrastructure ──────────────────────────────────────

struct Studio {
    engine: Arc<Engine>,
    hub: Arc<NotifyHub>,
    tenant: Tenant,
    room: Room,
    service: Service,
}

/// Friday 2026-09-18, 08:00 in Santiago (UTC-3 after the September switch).
fn friday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 18, 11, 0, 0).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

async fn open_studio(config: Config, ledger: Arc<Ledger>) -> Studio {
    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(ledger, hub.clone(), config));

    let tenant = assert_ok!(
        engine
            .register_tenant("la-bodega", "La Bodega Estudio", Some("America/Santiago"))
            .await
    );
    let room = assert_ok!(engine.add_room(tenant.id, "Sala Grande", true).await);
    let service = assert_ok!(
        engine
            .add_service(
                tenant.id,
                &NewService {
                    name: "Grabación".into(),
                    duration_minutes: 120,
                    buffer_minutes: 30,
                    published: true,
                    price: 40_000,
                },
            )
            .await
    );
    // Weekdays 10:00-14:00 and 16:00-22:00.
    for dow in 1..=5 {
        for (start, end) in [(hm(10, 0), hm(14, 0)), (hm(16, 0), hm(22, 0))] {
            assert_ok!(
                engine
                    .add_rule(
                        tenant.id,
                        &NewRule {
                            room_id: None,
                            day_of_week: dow,
                            start_time: start,
                            end_time: end,
                        },
                    )
                    .await
            );
        }
    }

    Studio {
        engine,
        hub,
        tenant,
        room,
        service,
    }
}

fn booking_body(studio: &Studio, start: DateTime<Utc>) -> String {
    format!(
        r#"{{
            "tenantSlug": "{}",
            "roomId": "{}",
            "serviceId": "{}",
            "startAt": "{}",
            "customerName": "Ignacia Soto",
            "customerEmail": "ignacia@example.cl",
            "notes": "two guitars, one vocal"
        }}"#,
        studio.tenant.slug,
        studio.room.id,
        studio.service.id,
        start.to_rfc3339(),
    )
}

fn query(studio: &Studio, days: u32) -> SlotQuery {
    SlotQuery::new(&studio.tenant.slug, studio.room.id, studio.service.id, Some(days))
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn list_book_cancel_round() {
    let studio = open_studio(Config::default(), Arc::new(Ledger::in_memory())).await;
    let mut inbox = studio.hub.subscribe(studio.tenant.id);

    let slots = assert_ok!(
        studio
            .engine
            .available_slots_at(&query(&studio, 1), friday_morning())
            .await
    );
    // 120 + 30 minutes: 10:00-11:30 in the morning, 16:00-19:30 in the evening.
    let tz = chrono_tz::America::Santiago;
    let starts: Vec<String> = slots
        .iter()
        .map(|s| s.start.with_timezone(&tz).format("%H:%M").to_string())
        .collect();
    assert_eq!(
        starts,
        vec![
            "10:00", "10:30", "11:00", "11:30", "16:00", "16:30", "17:00", "17:30", "18:00",
            "18:30", "19:00", "19:30",
        ]
    );

    let picked = slots[4];
    let request = assert_ok!(BookingRequest::from_json(&booking_body(&studio, picked.start)));
    let receipt = assert_ok!(studio.engine.commit_booking(&request).await);
    assert_eq!(receipt.start, picked.start);
    assert_eq!(receipt.end, picked.end + Duration::minutes(30));
    assert!(receipt.email_sent);

    let confirmation = assert_ok!(inbox.recv().await);
    assert_eq!(confirmation.booking_id, receipt.id);
    let (subject, body) = confirmation.render();
    assert_eq!(subject, "Booking confirmed: Grabación at La Bodega Estudio");
    assert!(body.contains("Time: 16:00 - 18:30 (America/Santiago)"));

    // 16:00-18:30 is now held; the evening opens again at 18:30.
    let after = assert_ok!(
        studio
            .engine
            .available_slots_at(&query(&studio, 1), friday_morning())
            .await
    );
    let evening: Vec<String> = after
        .iter()
        .map(|s| s.start.with_timezone(&tz).format("%H:%M").to_string())
        .filter(|s| s.as_str() >= "16:00")
        .collect();
    assert_eq!(evening, vec!["18:30", "19:00", "19:30"]);

    // Same slot again: taken.
    let again = assert_ok!(BookingRequest::from_json(&booking_body(&studio, picked.start)));
    let err = assert_err!(studio.engine.commit_booking(&again).await);
    assert_eq!(err.rejection(), Rejection::Conflict);
    assert_eq!(err.to_string(), "this slot is no longer available");

    assert_eq!(
        assert_ok!(studio.engine.cancel_booking(studio.tenant.id, receipt.id).await),
        CancelOutcome::Canceled
    );
    let reopened = assert_ok!(
        studio
            .engine
            .available_slots_at(&query(&studio, 1), friday_morning())
            .await
    );
    assert_eq!(reopened, slots);
}

#[tokio::test]
async fn slots_serialize_as_json_instants() {
    let studio = open_studio(Config::default(), Arc::new(Ledger::in_memory())).await;
    let slots = assert_ok!(
        studio
            .engine
            .available_slots_at(&query(&studio, 1), friday_morning())
            .await
    );
    let json = assert_ok!(serde_json::to_value(&slots[0]));
    assert_eq!(json["start"], "2026-09-18T13:00:00Z");
    assert_eq!(json["end"], "2026-09-18T15:00:00Z");
}

#[tokio::test]
async fn weekend_and_holiday_have_no_slots() {
    let studio = open_studio(Config::default(), Arc::new(Ledger::in_memory())).await;
    let holiday = NaiveDate::from_ymd_opt(2026, 9, 18).unwrap();
    assert_ok!(
        studio
            .engine
            .add_exception(
                studio.tenant.id,
                &NewException {
                    room_id: None,
                    date: holiday,
                    is_closed: true,
                    start_time: None,
                    end_time: None,
                },
            )
            .await
    );

    // Friday is a holiday, Saturday and Sunday have no rules.
    let slots = assert_ok!(
        studio
            .engine
            .available_slots_at(&query(&studio, 3), friday_morning())
            .await
    );
    assert!(slots.is_empty());

    // Monday opens again.
    let slots = assert_ok!(
        studio
            .engine
            .available_slots_at(&query(&studio, 4), friday_morning())
            .await
    );
    assert_eq!(slots.len(), 12);
}

#[tokio::test]
async fn rejections_are_classified() {
    let studio = open_studio(Config::default(), Arc::new(Ledger::in_memory())).await;

    let err = assert_err!(BookingRequest::from_json("{\"tenantSlug\": "));
    assert_eq!(err.rejection(), Rejection::Validation);

    let mut body = booking_body(&studio, friday_morning());
    body = body.replace("ignacia@example.cl", "not an email");
    let request = assert_ok!(BookingRequest::from_json(&body));
    let err = assert_err!(studio.engine.commit_booking(&request).await);
    assert!(matches!(&err, EngineError::Validation(fields) if fields[0].field == "customerEmail"));

    let mut request = assert_ok!(BookingRequest::from_json(&booking_body(
        &studio,
        friday_morning()
    )));
    request.service_id = Ulid::new().to_string();
    let err = assert_err!(studio.engine.commit_booking(&request).await);
    assert_eq!(err.rejection(), Rejection::NotFound);
    assert_eq!(err.to_string(), "service not found or unavailable");
}

#[tokio::test]
async fn unsubscribed_hub_reports_email_not_sent() {
    let studio = open_studio(Config::default(), Arc::new(Ledger::in_memory())).await;
    let request = assert_ok!(BookingRequest::from_json(&booking_body(
        &studio,
        Utc.with_ymd_and_hms(2026, 9, 18, 13, 0, 0).unwrap()
    )));
    let receipt = assert_ok!(studio.engine.commit_booking(&request).await);
    assert!(!receipt.email_sent);
}

#[tokio::test]
async fn durable_studio_keeps_bookings_across_restart() {
    let dir = std::env::temp_dir().join(format!("roomslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let config = Config {
        data_dir: Some(dir.clone()),
        ..Config::default()
    };
    let wal_path = config.wal_path().unwrap();

    let (tenant_id, booking_id) = {
        let ledger = Arc::new(Ledger::open(&wal_path).unwrap());
        let studio = open_studio(config.clone(), ledger.clone()).await;
        let request = assert_ok!(BookingRequest::from_json(&booking_body(
            &studio,
            Utc.with_ymd_and_hms(2026, 9, 18, 19, 0, 0).unwrap()
        )));
        let receipt = assert_ok!(studio.engine.commit_booking(&request).await);
        assert_ok!(ledger.compact().await);
        (studio.tenant.id, receipt.id)
    };

    let ledger = Arc::new(Ledger::open(&wal_path).unwrap());
    let engine = Engine::new(ledger, Arc::new(NotifyHub::new()), config);
    let bookings = assert_ok!(engine.list_bookings(tenant_id).await);
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, booking_id);
    assert_eq!(bookings[0].notes.as_deref(), Some("two guitars, one vocal"));

    let scope = assert_ok!(engine.resolve_tenant("la-bodega").await);
    assert_eq!(scope.tenant.id, tenant_id);
    let _ = std::fs::remove_dir_all(&dir);
}
