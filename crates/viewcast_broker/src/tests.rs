use super::engine::lock;
use super::exchange::Exchange;
use super::queue::Queue;
use super::{Broker, BrokerError, Delivery, ExchangeKind, QueueOptions, RedeliveryPolicy, Session};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn open_session(broker: &mut Broker) -> (String, UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel::<Delivery>();
    let session = Session::new(tx);
    let id = session.id.clone();
    broker.register_session(session);
    (id, rx)
}

fn private_queue() -> QueueOptions {
    QueueOptions {
        exclusive: true,
        auto_delete: true,
        durable: false,
    }
}

/// Declares the fanout exchange plus a private bound queue with a consumer.
fn subscriber(broker: &mut Broker) -> (String, String, UnboundedReceiver<Delivery>) {
    let (session, rx) = open_session(broker);
    broker
        .exchange_declare("viewed", ExchangeKind::Fanout, true)
        .unwrap();
    let declared = broker.queue_declare(&session, "", private_queue()).unwrap();
    broker
        .queue_bind(&session, &declared.queue, "viewed", "")
        .unwrap();
    broker
        .consume(&session, &declared.queue, None, false)
        .unwrap();
    (session, declared.queue, rx)
}

#[test]
fn test_exchange_routes_fanout_to_every_binding() {
    let mut exchange = Exchange::new("viewed", ExchangeKind::Fanout, true);
    exchange.bind("a", "");
    exchange.bind("b", "ignored");
    assert_eq!(exchange.route("anything"), vec!["a", "b"]);
}

#[test]
fn test_exchange_routes_direct_by_key() {
    let mut exchange = Exchange::new("jobs", ExchangeKind::Direct, false);
    exchange.bind("a", "encode");
    exchange.bind("b", "thumbnail");
    assert_eq!(exchange.route("thumbnail"), vec!["b"]);
    assert!(exchange.route("other").is_empty());
}

#[test]
fn test_exchange_bind_is_idempotent() {
    let mut exchange = Exchange::new("viewed", ExchangeKind::Fanout, true);
    exchange.bind("a", "");
    exchange.bind("a", "");
    assert_eq!(exchange.bindings.len(), 1);
}

#[test]
fn test_queue_round_robin() {
    let owner = "s".to_string();
    let mut queue = Queue::new("q", QueueOptions::default(), &owner);
    assert!(queue.next_consumer().is_none());
    for tag in ["c1", "c2"] {
        queue.add_consumer(super::queue::QueueConsumer {
            session: owner.clone(),
            tag: tag.to_string(),
            no_ack: false,
        });
    }
    let order: Vec<String> = (0..4)
        .map(|_| queue.next_consumer().unwrap().tag)
        .collect();
    assert_eq!(order, vec!["c1", "c2", "c1", "c2"]);
}

#[test]
fn test_broker_new() {
    let broker = Broker::default();
    assert!(broker.exchanges.is_empty());
    assert!(broker.queues.is_empty());
    assert!(broker.sessions.is_empty());
    assert!(broker.pending_acks.is_empty());
}

#[test]
fn test_exchange_redeclare_is_noop() {
    let mut broker = Broker::new();
    let (session, _, _rx) = subscriber(&mut broker);
    let queue_count = broker.queues.len();

    for _ in 0..3 {
        broker
            .exchange_declare("viewed", ExchangeKind::Fanout, true)
            .unwrap();
    }

    assert_eq!(broker.exchanges.len(), 1);
    assert_eq!(broker.exchanges["viewed"].bindings.len(), 1);
    assert_eq!(broker.queues.len(), queue_count);
    assert!(broker.sessions.contains_key(&session));
}

#[test]
fn test_exchange_redeclare_with_other_kind_is_refused() {
    let mut broker = Broker::new();
    broker
        .exchange_declare("viewed", ExchangeKind::Direct, true)
        .unwrap();

    let err = broker
        .exchange_declare("viewed", ExchangeKind::Fanout, true)
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed { .. }));
    assert_eq!(err.reply_code(), 406);
}

#[test]
fn test_default_exchange_cannot_be_declared() {
    let mut broker = Broker::new();
    let err = broker
        .exchange_declare("", ExchangeKind::Direct, true)
        .unwrap_err();
    assert_eq!(err.reply_code(), 403);
}

#[test]
fn test_queue_declare_generates_names() {
    let mut broker = Broker::new();
    let (session, _rx) = open_session(&mut broker);

    let a = broker.queue_declare(&session, "", private_queue()).unwrap();
    let b = broker.queue_declare(&session, "", private_queue()).unwrap();

    assert!(a.queue.starts_with("amq.gen-"));
    assert_ne!(a.queue, b.queue);
    assert_eq!(a.message_count, 0);
    assert_eq!(a.consumer_count, 0);
}

#[test]
fn test_exclusive_queue_is_locked_to_its_session() {
    let mut broker = Broker::new();
    let (owner, _rx1) = open_session(&mut broker);
    let (other, _rx2) = open_session(&mut broker);
    let declared = broker.queue_declare(&owner, "", private_queue()).unwrap();

    let err = broker
        .consume(&other, &declared.queue, None, false)
        .unwrap_err();
    assert_eq!(err, BrokerError::ResourceLocked(declared.queue.clone()));
    assert_eq!(err.reply_code(), 405);
}

#[test]
fn test_operations_require_a_session() {
    let mut broker = Broker::new();
    let err = broker
        .queue_declare(&"ghost".to_string(), "", QueueOptions::default())
        .unwrap_err();
    assert_eq!(err, BrokerError::UnknownSession("ghost".to_string()));
}

#[test]
fn test_publish_to_unknown_exchange_fails() {
    let mut broker = Broker::new();
    let err = broker
        .publish("viewed", "", "{}".to_string())
        .unwrap_err();
    assert_eq!(err, BrokerError::ExchangeNotFound("viewed".to_string()));
    assert_eq!(err.reply_code(), 404);
}

#[test]
fn test_publish_without_bindings_is_dropped() {
    let mut broker = Broker::new();
    broker
        .exchange_declare("viewed", ExchangeKind::Fanout, true)
        .unwrap();
    assert_eq!(broker.publish("viewed", "", "{}".to_string()).unwrap(), 0);
}

#[test]
fn test_fanout_delivers_one_copy_per_bound_queue() {
    let mut broker = Broker::new();
    let mut receivers: Vec<UnboundedReceiver<Delivery>> = (0..3)
        .map(|_| subscriber(&mut broker).2)
        .collect();

    let routed = broker
        .publish("viewed", "", r#"{"videoPath":"viewed-2"}"#.to_string())
        .unwrap();
    assert_eq!(routed, 3);

    for rx in receivers.iter_mut() {
        let delivery = rx.try_recv().expect("each subscriber gets a copy");
        assert_eq!(delivery.payload, r#"{"videoPath":"viewed-2"}"#);
        assert_eq!(delivery.exchange, "viewed");
        assert_eq!(delivery.delivery_tag, 1);
        assert!(!delivery.redelivered);
        assert!(rx.try_recv().is_err(), "exactly one copy");
    }
    assert_eq!(broker.pending_acks.len(), 3);
}

#[test]
fn test_delivery_order_is_preserved_per_queue() {
    let mut broker = Broker::new();
    let (_, _, mut rx) = subscriber(&mut broker);

    for i in 1..=3 {
        broker
            .publish("viewed", "", format!("m{i}"))
            .unwrap();
    }

    let received: Vec<(u64, String)> = (0..3)
        .map(|_| {
            let d = rx.try_recv().unwrap();
            (d.delivery_tag, d.payload)
        })
        .collect();
    assert_eq!(
        received,
        vec![(1, "m1".into()), (2, "m2".into()), (3, "m3".into())]
    );
}

#[test]
fn test_messages_wait_for_a_consumer() {
    let mut broker = Broker::new();
    let (session, mut rx) = open_session(&mut broker);
    broker
        .exchange_declare("viewed", ExchangeKind::Fanout, true)
        .unwrap();
    let declared = broker.queue_declare(&session, "", private_queue()).unwrap();
    broker
        .queue_bind(&session, &declared.queue, "viewed", "")
        .unwrap();

    broker.publish("viewed", "", "early".to_string()).unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.queues[&declared.queue].ready.len(), 1);

    broker
        .consume(&session, &declared.queue, Some("ctag-1"), false)
        .unwrap();
    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.payload, "early");
    assert_eq!(delivery.consumer_tag, "ctag-1");
}

#[test]
fn test_default_exchange_routes_by_queue_name() {
    let mut broker = Broker::new();
    let (session, mut rx) = open_session(&mut broker);
    broker
        .queue_declare(&session, "work", QueueOptions::default())
        .unwrap();
    broker.consume(&session, "work", None, true).unwrap();

    assert_eq!(broker.publish("", "work", "job".to_string()).unwrap(), 1);
    assert_eq!(rx.try_recv().unwrap().payload, "job");
    // no_ack consumers leave nothing outstanding
    assert!(broker.pending_acks.is_empty());
}

#[test]
fn test_duplicate_consumer_tag_is_refused() {
    let mut broker = Broker::new();
    let (session, _rx) = open_session(&mut broker);
    broker
        .queue_declare(&session, "work", QueueOptions::default())
        .unwrap();
    broker.consume(&session, "work", Some("c"), false).unwrap();

    let err = broker
        .consume(&session, "work", Some("c"), false)
        .unwrap_err();
    assert_eq!(err, BrokerError::ConsumerTagInUse("c".to_string()));
}

#[test]
fn test_ack_removes_pending_delivery() {
    let mut broker = Broker::new();
    let (session, _, mut rx) = subscriber(&mut broker);
    broker.publish("viewed", "", "hello".to_string()).unwrap();

    let delivery = rx.try_recv().unwrap();
    assert!(
        broker
            .pending_acks
            .contains_key(&(session.clone(), delivery.delivery_tag))
    );

    broker
        .ack(&session, delivery.delivery_tag, false)
        .unwrap();
    assert!(broker.pending_acks.is_empty());
}

#[test]
fn test_ack_multiple_settles_everything_up_to_tag() {
    let mut broker = Broker::new();
    let (session, _, mut rx) = subscriber(&mut broker);
    for i in 0..3 {
        broker.publish("viewed", "", format!("m{i}")).unwrap();
    }
    let _ = (rx.try_recv(), rx.try_recv(), rx.try_recv());

    broker.ack(&session, 2, true).unwrap();
    assert_eq!(broker.pending_acks.len(), 1);
    assert!(broker.pending_acks.contains_key(&(session.clone(), 3)));
}

#[test]
fn test_handle_ack_unknown_delivery_tag() {
    let mut broker = Broker::new();
    let (session, _rx) = open_session(&mut broker);

    let err = broker.ack(&session, 42, false).unwrap_err();
    assert_eq!(err, BrokerError::UnknownDeliveryTag(42));
    assert!(broker.pending_acks.is_empty());
}

#[test]
fn test_nack_with_requeue_redelivers() {
    let mut broker = Broker::new();
    let (session, _, mut rx) = subscriber(&mut broker);
    broker.publish("viewed", "", "retry me".to_string()).unwrap();
    let first = rx.try_recv().unwrap();

    broker.nack(&session, first.delivery_tag, true).unwrap();

    let second = rx.try_recv().unwrap();
    assert_eq!(second.payload, "retry me");
    assert!(second.redelivered);
    assert_eq!(second.delivery_tag, 2);
    assert_eq!(second.message_id, first.message_id);
}

#[test]
fn test_nack_without_requeue_drops() {
    let mut broker = Broker::new();
    let (session, queue, mut rx) = subscriber(&mut broker);
    broker.publish("viewed", "", "poison".to_string()).unwrap();
    let delivery = rx.try_recv().unwrap();

    broker.nack(&session, delivery.delivery_tag, false).unwrap();

    assert!(rx.try_recv().is_err());
    assert!(broker.pending_acks.is_empty());
    assert!(broker.queues[&queue].ready.is_empty());
}

#[test]
fn test_cleanup_session_deletes_exclusive_queue_and_binding() {
    let mut broker = Broker::new();
    let (gone, gone_queue, _rx1) = subscriber(&mut broker);
    let (_, kept_queue, mut kept_rx) = subscriber(&mut broker);

    broker.publish("viewed", "", "before".to_string()).unwrap();
    broker.cleanup_session(&gone);

    assert!(!broker.sessions.contains_key(&gone));
    assert!(!broker.queues.contains_key(&gone_queue));
    assert!(broker.queues.contains_key(&kept_queue));
    assert_eq!(broker.exchanges["viewed"].bindings.len(), 1);
    // the closed session's unacked copy went away with its queue
    assert!(broker.pending_acks.keys().all(|(s, _)| s != &gone));

    assert_eq!(broker.publish("viewed", "", "after".to_string()).unwrap(), 1);
    assert_eq!(kept_rx.try_recv().unwrap().payload, "before");
    assert_eq!(kept_rx.try_recv().unwrap().payload, "after");
}

#[test]
fn test_cleanup_session_requeues_to_shared_queue() {
    let mut broker = Broker::new();
    let (first, mut first_rx) = open_session(&mut broker);
    let (second, mut second_rx) = open_session(&mut broker);
    broker
        .queue_declare(&first, "shared", QueueOptions::default())
        .unwrap();
    broker.consume(&first, "shared", None, false).unwrap();

    broker.publish("", "shared", "m1".to_string()).unwrap();
    broker.publish("", "shared", "m2".to_string()).unwrap();
    assert_eq!(first_rx.try_recv().unwrap().payload, "m1");
    assert_eq!(first_rx.try_recv().unwrap().payload, "m2");

    broker.cleanup_session(&first);
    broker.consume(&second, "shared", None, false).unwrap();

    let redelivered: Vec<(String, bool)> = (0..2)
        .map(|_| {
            let d = second_rx.try_recv().unwrap();
            (d.payload, d.redelivered)
        })
        .collect();
    assert_eq!(
        redelivered,
        vec![("m1".to_string(), true), ("m2".to_string(), true)]
    );
}

#[test]
fn test_requeue_expired_redelivers_then_drops() {
    let policy = RedeliveryPolicy {
        ack_timeout: Duration::from_millis(10),
        max_redeliveries: 1,
    };
    let mut broker = Broker::with_policy(policy);
    let (_, _, mut rx) = subscriber(&mut broker);
    broker.publish("viewed", "", "slow".to_string()).unwrap();
    let first = rx.try_recv().unwrap();
    let far_future = first.timestamp + 60_000;

    assert_eq!(broker.requeue_expired(far_future), 1);
    let second = rx.try_recv().unwrap();
    assert!(second.redelivered);

    // second delivery was the single allowed redelivery
    assert_eq!(broker.requeue_expired(far_future), 0);
    assert!(rx.try_recv().is_err());
    assert!(broker.pending_acks.is_empty());
}

#[test]
fn test_requeue_expired_leaves_fresh_deliveries_alone() {
    let mut broker = Broker::new();
    let (_, _, mut rx) = subscriber(&mut broker);
    broker.publish("viewed", "", "fresh".to_string()).unwrap();
    let delivery = rx.try_recv().unwrap();

    assert_eq!(broker.requeue_expired(delivery.timestamp), 0);
    assert_eq!(broker.pending_acks.len(), 1);
}

#[test]
fn test_closed_receiver_keeps_message_queued() {
    let mut broker = Broker::new();
    let (_, queue, rx) = subscriber(&mut broker);
    drop(rx);

    broker.publish("viewed", "", "hello".to_string()).unwrap();

    assert!(broker.pending_acks.is_empty());
    assert_eq!(broker.queues[&queue].ready.len(), 1);
}

#[test]
fn test_shared_broker_lock() {
    let broker = Broker::new().shared();
    lock(&broker)
        .exchange_declare("viewed", ExchangeKind::Fanout, true)
        .unwrap();
    assert!(lock(&broker).exchanges.contains_key("viewed"));
}

#[test]
fn test_cancel_stops_dispatch_to_the_consumer() {
    let mut broker = Broker::new();
    let (first, mut first_rx) = open_session(&mut broker);
    let (second, mut second_rx) = open_session(&mut broker);
    broker
        .queue_declare(&first, "work", QueueOptions::default())
        .unwrap();
    broker.consume(&first, "work", Some("a"), false).unwrap();
    broker.consume(&second, "work", Some("b"), false).unwrap();

    assert!(broker.cancel(&first, "a").unwrap());
    assert!(!broker.cancel(&first, "a").unwrap());

    broker.publish("", "work", "one".to_string()).unwrap();
    broker.publish("", "work", "two".to_string()).unwrap();

    assert!(first_rx.try_recv().is_err());
    assert_eq!(second_rx.try_recv().unwrap().payload, "one");
    assert_eq!(second_rx.try_recv().unwrap().payload, "two");
    assert_eq!(broker.queues["work"].consumers.len(), 1);
}

#[test]
fn test_cancel_keeps_received_deliveries_pending() {
    let mut broker = Broker::new();
    let (session, mut rx) = open_session(&mut broker);
    broker
        .queue_declare(&session, "work", QueueOptions::default())
        .unwrap();
    let tag = broker.consume(&session, "work", None, false).unwrap();
    broker.publish("", "work", "held".to_string()).unwrap();
    let delivery = rx.try_recv().unwrap();

    broker.cancel(&session, &tag).unwrap();

    assert!(
        broker
            .pending_acks
            .contains_key(&(session.clone(), delivery.delivery_tag))
    );
    broker.ack(&session, delivery.delivery_tag, false).unwrap();
    assert!(broker.pending_acks.is_empty());
}

#[test]
fn test_cancel_deletes_abandoned_auto_delete_queue() {
    let mut broker = Broker::new();
    let (session, _rx) = open_session(&mut broker);
    broker
        .exchange_declare("viewed", ExchangeKind::Fanout, true)
        .unwrap();
    let declared = broker.queue_declare(&session, "", private_queue()).unwrap();
    broker
        .queue_bind(&session, &declared.queue, "viewed", "")
        .unwrap();
    let tag = broker
        .consume(&session, &declared.queue, None, false)
        .unwrap();

    broker.cancel(&session, &tag).unwrap();

    assert!(!broker.queues.contains_key(&declared.queue));
    assert!(broker.exchanges["viewed"].bindings.is_empty());
    assert_eq!(broker.publish("viewed", "", "late".to_string()).unwrap(), 0);
}

#[test]
fn test_cancel_requires_a_session() {
    let mut broker = Broker::new();
    let err = broker.cancel(&"session-gone".to_string(), "a").unwrap_err();
    assert_eq!(err.reply_code(), 504);
}

#[test]
fn test_delivery_wire_form() {
    let mut broker = Broker::new();
    let (_, _, mut rx) = subscriber(&mut broker);
    broker
        .publish("viewed", "", r#"{"videoPath":"viewed-2"}"#.to_string())
        .unwrap();
    let delivery = rx.try_recv().unwrap();

    let value = serde_json::to_value(&delivery).unwrap();
    assert_eq!(value["delivery_tag"], 1);
    assert_eq!(value["exchange"], "viewed");
    assert_eq!(value["routing_key"], "");
    assert_eq!(value["redelivered"], false);
    assert_eq!(value["payload"], r#"{"videoPath":"viewed-2"}"#);
    assert!(value["consumer_tag"].as_str().unwrap().starts_with("amq.ctag-"));

    let back: Delivery = serde_json::from_value(value).unwrap();
    assert_eq!(back, delivery);
}
