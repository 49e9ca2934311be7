//! Integration tests for the engine end to end.
//!
//! Tests: engine operation → store transaction → domain workflow → event bus
//!
//! Verifies:
//! - Procurement receipts and completion keep quantities and stock consistent
//! - Rejections and failures leave no partial state behind
//! - Scheduler ticks race safely with manual transitions
//! - Concurrent callers of one transition see exactly one winner

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use assetflow_core::{
        Actor, DomainError, FixedClock, Outcome, RoomId, UnitId, UserId, WarehouseId, Workflow,
    };
    use assetflow_distribution::{
        AssetRequestStatus, BatchId, Condition, DistributionId, DistributionStatus, NewBatch, NewDistribution,
        NewAssetRequest, NewReturnBatch, NewReturnItem, RequestedAsset, ReturnBatchStatus,
        TaskType,
    };
    use assetflow_events::{Event, EventBus, InMemoryEventBus, Subscription};
    use assetflow_inventory::{
        CatalogItemId, InstanceId, ItemStatus, Location, MovementKind, NewItemDescriptor,
    };
    use assetflow_loans::{
        AssetLoanStatus, LoanItemId, NewAssetLoan, NewVenueLoan, VenueLoanStatus,
    };
    use assetflow_purchasing::{
        Delivery, ItemRef, LineDelivery, LineItemId, NewLine, NewRequest, ProcurementStatus,
        RequestId,
    };

    use crate::config::EngineConfig;
    use crate::engine::stock::StockTransaction;
    use crate::engine::{Engine, EngineError, Step, WorkflowEnvelope};
    use crate::scheduler::VenueLoanScheduler;
    use crate::store::{InMemoryStore, StoreError};

    type TestBus = Arc<InMemoryEventBus<WorkflowEnvelope>>;
    type TestEngine = Engine<InMemoryStore, TestBus, Arc<FixedClock>>;

    const WAREHOUSE: WarehouseId = WarehouseId::new(3);
    const UNIT: UnitId = UnitId::new(12);
    const ROOM: RoomId = RoomId::new(4);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn setup_with(config: EngineConfig) -> (TestEngine, TestBus, Arc<FixedClock>) {
        assetflow_observability::init();
        let store = InMemoryStore::new();
        let bus: TestBus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let engine = Engine::new(store, bus.clone(), clock.clone(), config);
        (engine, bus, clock)
    }

    fn setup() -> (TestEngine, TestBus, Arc<FixedClock>) {
        setup_with(EngineConfig::default().with_scheduler_enabled(false))
    }

    fn serials(prefix: &str, range: std::ops::RangeInclusive<u32>) -> Vec<String> {
        range.map(|i| format!("{prefix}{i}")).collect()
    }

    fn router(engine: &TestEngine) -> CatalogItemId {
        engine
            .register_catalog_item(&NewItemDescriptor::new("Router", "pcs").with_category("NET"))
            .unwrap()
    }

    fn open_request(engine: &TestEngine, admin: UserId, lines: Vec<NewLine>) -> RequestId {
        let id = engine
            .create_request(NewRequest {
                requester: UserId::new(),
                warehouse: None,
                notes: "lab refresh".into(),
                lines,
            })
            .unwrap();
        assert!(engine.approve_request(id, admin).unwrap().is_applied());
        id
    }

    fn line(item: CatalogItemId, qty: u64) -> NewLine {
        NewLine {
            item: ItemRef::Catalog(item),
            requested_quantity: qty,
        }
    }

    fn delivery(invoice: &str, line: u64, quantity: u64, serial_numbers: Vec<String>) -> Delivery {
        Delivery {
            invoice_number: invoice.into(),
            lines: vec![LineDelivery {
                line: LineItemId::new(line),
                quantity,
                serial_numbers,
            }],
        }
    }

    fn received(engine: &TestEngine, id: RequestId, line: u64) -> u64 {
        engine
            .request(id)
            .unwrap()
            .unwrap()
            .line(LineItemId::new(line))
            .unwrap()
            .received_quantity()
    }

    /// Procure units with the given serials into `WAREHOUSE`.
    fn procure(engine: &TestEngine, admin: UserId, serials: &[String]) -> Vec<InstanceId> {
        let item = router(engine);
        let id = open_request(engine, admin, vec![line(item, serials.len() as u64)]);
        let report = engine
            .receive_delivery(id, admin, &delivery("INV-P", 1, serials.len() as u64, serials.to_vec()))
            .unwrap();
        assert!(report.outcome.is_applied(), "{:?}", report);
        assert!(engine.complete_request(id, admin, WAREHOUSE).unwrap().is_applied());
        serials
            .iter()
            .map(|s| engine.find_by_serial(s).unwrap().unwrap().id())
            .collect()
    }

    /// Install units into `ROOM` through a verified distribution batch.
    fn install_in_room(engine: &TestEngine, admin: UserId, units: &[InstanceId]) -> BatchId {
        let batch = engine
            .create_batch(NewBatch {
                name: "Room 4 fit-out".into(),
                created_by: admin,
                warehouse: WAREHOUSE,
                unit: UNIT,
                notes: String::new(),
                items: units
                    .iter()
                    .map(|id| NewDistribution {
                        instance: *id,
                        room: Some(ROOM),
                        address: "Building A".into(),
                        task_type: TaskType::Installation,
                        field_staff: None,
                    })
                    .collect(),
            })
            .unwrap();
        assert!(engine.approve_batch(batch, admin).unwrap().is_applied());
        for i in 1..=units.len() as u64 {
            let task = DistributionId::new(i);
            assert!(engine
                .submit_task_verification(batch, task, Some("mounted".into()), admin)
                .unwrap()
                .is_applied());
            assert!(engine.verify_task(batch, task, admin).unwrap().is_applied());
        }
        batch
    }

    fn event_types(sub: &Subscription<WorkflowEnvelope>) -> Vec<String> {
        sub.drain()
            .iter()
            .map(|env| env.payload().event_type().to_string())
            .collect()
    }

    #[test]
    fn full_lifecycle_adds_stock_exactly_once() {
        let (engine, bus, _clock) = setup();
        let sub = bus.subscribe();
        let admin = UserId::new();
        let item = router(&engine);
        let id = open_request(&engine, admin, vec![line(item, 10)]);

        let first = engine
            .receive_delivery(id, admin, &delivery("INV-1", 1, 4, serials("S", 1..=4)))
            .unwrap();
        assert!(first.outcome.is_applied());
        let second = engine
            .receive_delivery(id, admin, &delivery("INV-1", 1, 6, serials("S", 5..=10)))
            .unwrap();
        assert!(second.outcome.is_applied());
        assert_eq!(received(&engine, id, 1), 10);

        let outcome = engine.complete_request(id, admin, WAREHOUSE).unwrap();
        assert!(outcome.is_applied(), "{outcome:?}");
        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 10);

        let movements = engine.movements_for(item, WAREHOUSE).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::In);
        assert_eq!(movements[0].quantity, 10);

        let request = engine.request(id).unwrap().unwrap();
        assert_eq!(request.status(), ProcurementStatus::Completed);
        assert_eq!(request.invoice_number(), Some("INV-1"));

        let again = engine.complete_request(id, admin, WAREHOUSE).unwrap();
        assert!(again.is_rejected());
        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 10);
        assert_eq!(engine.movements_for(item, WAREHOUSE).unwrap().len(), 1);
        engine.verify_ledger().unwrap();

        let unit = engine.find_by_serial("S7").unwrap().unwrap();
        assert_eq!(unit.status(), ItemStatus::Available);
        assert_eq!(unit.location().and_then(|l| l.warehouse()), Some(WAREHOUSE));

        assert_eq!(
            event_types(&sub),
            vec![
                "procurement.request.created",
                "procurement.request.approved",
                "procurement.request.received",
                "procurement.request.received",
                "procurement.request.completed",
            ]
        );
    }

    #[test]
    fn second_invoice_number_is_rejected_without_mutation() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let item = router(&engine);
        let id = open_request(&engine, admin, vec![line(item, 5)]);

        engine
            .receive_delivery(id, admin, &delivery("INV-1", 1, 2, vec![]))
            .unwrap();
        let units_before = engine.read(|t| t.registry.len()).unwrap();

        let report = engine
            .receive_delivery(id, admin, &delivery("INV-2", 1, 1, vec![]))
            .unwrap();
        assert!(report.outcome.is_rejected());
        assert!(report.outcome.message().contains("invoice number mismatch"));
        assert_eq!(received(&engine, id, 1), 2);
        assert_eq!(engine.read(|t| t.registry.len()).unwrap(), units_before);
    }

    #[test]
    fn overshoot_is_rejected() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let item = router(&engine);
        let id = open_request(&engine, admin, vec![line(item, 5)]);

        engine
            .receive_delivery(id, admin, &delivery("INV-9", 1, 5, vec![]))
            .unwrap();
        let report = engine
            .receive_delivery(id, admin, &delivery("INV-9", 1, 1, vec![]))
            .unwrap();
        assert!(report.outcome.is_rejected());
        assert_eq!(received(&engine, id, 1), 5);
    }

    #[test]
    fn duplicate_serial_rejects_the_whole_line_across_requests() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let item = router(&engine);

        let a = open_request(&engine, admin, vec![line(item, 1)]);
        engine
            .receive_delivery(a, admin, &delivery("INV-A", 1, 1, vec!["SN-100".into()]))
            .unwrap();

        let b = open_request(&engine, admin, vec![line(item, 2)]);
        let report = engine
            .receive_delivery(
                b,
                admin,
                &delivery("INV-B", 1, 2, vec!["SN-100".into(), "SN-200".into()]),
            )
            .unwrap();

        assert!(report.outcome.is_rejected());
        assert!(report.messages()[0].contains("SN-100"));
        assert!(engine.find_by_serial("SN-200").unwrap().is_none());
        assert_eq!(received(&engine, b, 1), 0);
        let b = engine.request(b).unwrap().unwrap();
        assert_eq!(b.status(), ProcurementStatus::Approved);
        assert_eq!(b.invoice_number(), None);
    }

    #[test]
    fn one_bad_line_does_not_block_the_others() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let item = router(&engine);
        let id = open_request(&engine, admin, vec![line(item, 3), line(item, 2)]);

        let report = engine
            .receive_delivery(
                id,
                admin,
                &Delivery {
                    invoice_number: "INV-7".into(),
                    lines: vec![
                        LineDelivery {
                            line: LineItemId::new(1),
                            quantity: 3,
                            serial_numbers: vec![],
                        },
                        LineDelivery {
                            line: LineItemId::new(2),
                            quantity: 4,
                            serial_numbers: vec![],
                        },
                    ],
                },
            )
            .unwrap();

        assert!(report.outcome.is_applied());
        assert_eq!(report.accepted(), 1);
        assert!(report.lines[1].outcome.is_rejected());
        assert_eq!(received(&engine, id, 1), 3);
        assert_eq!(received(&engine, id, 2), 0);
        assert_eq!(
            engine.request(id).unwrap().unwrap().status(),
            ProcurementStatus::Received
        );
    }

    #[test]
    fn unknown_references() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();

        let outcome = engine.approve_request(RequestId::new(42), admin).unwrap();
        assert_eq!(
            outcome,
            Outcome::rejected("procurement request #42 not found")
        );

        let err = engine
            .create_request(NewRequest {
                requester: admin,
                warehouse: None,
                notes: String::new(),
                lines: vec![line(CatalogItemId::new(99), 1)],
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::NotFound(_))));
    }

    #[test]
    fn pending_item_is_registered_and_bound() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let id = open_request(
            &engine,
            admin,
            vec![NewLine {
                item: ItemRef::Pending(NewItemDescriptor::new("Patch panel", "pcs").with_category("NET")),
                requested_quantity: 1,
            }],
        );
        engine
            .receive_delivery(id, admin, &delivery("INV-3", 1, 1, vec![]))
            .unwrap();
        assert!(engine.complete_request(id, admin, WAREHOUSE).unwrap().is_rejected());

        assert!(engine
            .register_pending_item(id, LineItemId::new(1), admin)
            .unwrap()
            .is_applied());
        let item = engine
            .request(id)
            .unwrap()
            .unwrap()
            .line(LineItemId::new(1))
            .unwrap()
            .item()
            .catalog_item()
            .unwrap();
        assert_eq!(engine.catalog_item(item).unwrap().unwrap().item_code(), "NET-001");

        assert!(engine.complete_request(id, admin, WAREHOUSE).unwrap().is_applied());
        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 1);
        assert!(engine.list_low_stock(10).unwrap().iter().any(|l| l.item == item));
        assert!(engine.list_low_stock(1).unwrap().is_empty());
    }

    #[test]
    fn failed_or_rejected_transitions_roll_back() {
        let (engine, bus, _clock) = setup();
        let sub = bus.subscribe();
        let item = CatalogItemId::new(1);

        let err = engine
            .transition::<Outcome>("test.fail", 0, |t| {
                t.ledger.add(item, WAREHOUSE, 5, "seed", t0())?;
                Err(StoreError::Unavailable("disk gone".into()).into())
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));

        let outcome = engine
            .transition("test.reject", 0, |t| {
                t.ledger.add(item, WAREHOUSE, 5, "seed", t0())?;
                Ok(Step::new(Outcome::rejected("not today")))
            })
            .unwrap();
        assert!(outcome.is_rejected());

        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 0);
        assert!(engine.movements_for(item, WAREHOUSE).unwrap().is_empty());
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn rejecting_a_batch_cascades_and_archives_every_draft() {
        let (engine, bus, _clock) = setup();
        let admin = UserId::new();
        let units = procure(&engine, admin, &serials("D", 1..=5));
        let batch = engine
            .create_batch(NewBatch {
                name: "Spring rollout".into(),
                created_by: admin,
                warehouse: WAREHOUSE,
                unit: UNIT,
                notes: String::new(),
                items: units
                    .iter()
                    .map(|id| NewDistribution {
                        instance: *id,
                        room: None,
                        address: "Annex".into(),
                        task_type: TaskType::Delivery,
                        field_staff: None,
                    })
                    .collect(),
            })
            .unwrap();
        for id in &units {
            assert_eq!(engine.instance(*id).unwrap().unwrap().status(), ItemStatus::Processing);
        }

        let sub = bus.subscribe();
        let outcome = engine
            .reject_batch(batch, admin, Some("budget frozen".into()))
            .unwrap();
        assert!(outcome.message().contains("5 distributions rejected"));

        let archived = engine.rejected_distributions(batch).unwrap();
        assert_eq!(archived.len(), 5);
        assert!(archived
            .iter()
            .all(|r| r.snapshot().status() == DistributionStatus::Rejected
                && r.reason() == Some("budget frozen")));

        let batch = engine.batch(batch).unwrap().unwrap();
        assert!(batch.distributions().is_empty());
        for id in &units {
            assert_eq!(engine.instance(*id).unwrap().unwrap().status(), ItemStatus::Available);
        }
        assert_eq!(event_types(&sub), vec!["distribution.batch.rejected"]);
    }

    #[test]
    fn asset_loan_round_trip() {
        let (engine, bus, _clock) = setup();
        let admin = UserId::new();
        let units = procure(&engine, admin, &serials("L", 1..=2));

        let loan = engine
            .create_asset_loan(NewAssetLoan {
                unit: UNIT,
                warehouse: WAREHOUSE,
                requester: UserId::new(),
                instances: units.clone(),
                notes: "exam week".into(),
            })
            .unwrap();
        let sub = bus.subscribe();

        assert!(engine.ship_asset_loan(loan, admin).unwrap().is_rejected());
        assert!(engine.approve_asset_loan(loan, admin).unwrap().is_applied());
        assert!(engine.ship_asset_loan(loan, admin).unwrap().is_applied());
        assert_eq!(engine.instance(units[0]).unwrap().unwrap().status(), ItemStatus::Processing);
        assert!(engine.receive_asset_loan(loan, admin).unwrap().is_applied());
        assert_eq!(engine.instance(units[0]).unwrap().unwrap().status(), ItemStatus::InUse);

        assert!(engine.request_asset_loan_return(loan, admin, None).unwrap().is_applied());
        assert!(engine.approve_asset_loan_return(loan, admin).unwrap().is_applied());
        for i in 1..=2 {
            let item = LoanItemId::new(i);
            assert!(engine
                .submit_return_proof(loan, item, "photo.jpg", admin)
                .unwrap()
                .is_applied());
            assert!(engine
                .verify_return_item(loan, item, true, None, admin)
                .unwrap()
                .is_applied());
        }

        let loan = engine.asset_loan(loan).unwrap().unwrap();
        assert_eq!(loan.status(), AssetLoanStatus::Completed);
        for id in &units {
            let unit = engine.instance(*id).unwrap().unwrap();
            assert_eq!(unit.status(), ItemStatus::Available);
            assert_eq!(unit.location().and_then(|l| l.warehouse()), Some(WAREHOUSE));
        }
        let types = event_types(&sub);
        assert_eq!(types.last().map(String::as_str), Some("loans.asset_loan.completed"));
        assert_eq!(
            types.iter().filter(|t| *t == "loans.asset_loan.completed").count(),
            1
        );
    }

    #[test]
    fn scheduler_tick_loses_race_against_manual_completion() {
        let (engine, bus, clock) = setup();
        let admin = UserId::new();
        let units = procure(&engine, admin, &serials("V", 1..=2));
        install_in_room(&engine, admin, &units);

        let loan = engine
            .create_venue_loan(NewVenueLoan {
                room: ROOM,
                borrower_unit: UnitId::new(20),
                borrower: UserId::new(),
                event_name: "Open day".into(),
                start: t0() + chrono::Duration::hours(1),
                end: t0() + chrono::Duration::hours(3),
                notes: String::new(),
            })
            .unwrap();
        assert!(engine.approve_venue_loan(loan, admin).unwrap().is_applied());
        let sub = bus.subscribe();

        assert_eq!(engine.run_tick(t0()).unwrap().started, 0);
        let tick = engine.run_tick(t0() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(tick.started, 1);
        for id in &units {
            assert_eq!(engine.instance(*id).unwrap().unwrap().status(), ItemStatus::Loaned);
        }

        clock.set(t0() + chrono::Duration::hours(2));
        assert!(engine.complete_venue_loan(loan, admin).unwrap().is_applied());

        let late = engine.run_tick(t0() + chrono::Duration::hours(4)).unwrap();
        assert_eq!(late.completed, 0);
        assert!(engine.complete_venue_loan(loan, admin).unwrap().is_rejected());

        let loan = engine.venue_loan(loan).unwrap().unwrap();
        assert_eq!(loan.status(), VenueLoanStatus::Completed);
        assert!(loan.completed().map(|s| s.actor) == Some(Actor::User(admin)));
        for id in &units {
            let unit = engine.instance(*id).unwrap().unwrap();
            assert_eq!(unit.status(), ItemStatus::InUse);
            assert_eq!(unit.location().and_then(|l| l.room()), Some(ROOM));
        }

        let events = sub.drain();
        let started: Vec<_> = events
            .iter()
            .filter(|e| e.payload().event_type() == "loans.venue_loan.started")
            .collect();
        assert_eq!(started.len(), 1);
        assert!(started[0].payload().actor().is_scheduler());
        assert_eq!(
            events
                .iter()
                .filter(|e| e.payload().event_type() == "loans.venue_loan.completed")
                .count(),
            1
        );
    }

    #[test]
    fn return_batch_brings_units_home() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let units = procure(&engine, admin, &serials("R", 1..=2));
        install_in_room(&engine, admin, &units);

        let batch = engine
            .create_return_batch(NewReturnBatch {
                warehouse: WAREHOUSE,
                return_date: t0().date_naive(),
                created_by: admin,
                notes: String::new(),
                items: units
                    .iter()
                    .map(|id| NewReturnItem {
                        instance: *id,
                        unit: UNIT,
                        reason: Some("end of term".into()),
                        condition: Condition::Good,
                        condition_notes: None,
                    })
                    .collect(),
            })
            .unwrap();

        let created = engine.return_batch(batch).unwrap().unwrap();
        assert_eq!(created.batch_code(), "RET-WH003-240301-001");

        assert!(engine.confirm_return_batch(batch, admin).unwrap().is_applied());
        assert!(engine.cancel_return_batch(batch, admin, None).unwrap().is_rejected());
        assert_eq!(
            engine.return_batch(batch).unwrap().unwrap().status(),
            ReturnBatchStatus::Confirmed
        );
        for id in &units {
            let unit = engine.instance(*id).unwrap().unwrap();
            assert_eq!(unit.status(), ItemStatus::Returned);
            assert_eq!(unit.location(), Some(Location::Warehouse { warehouse: WAREHOUSE }));
        }
    }

    #[test]
    fn scheduler_thread_starts_due_loans() {
        let (engine, _bus, clock) = setup_with(
            EngineConfig::default().with_scheduler_interval(Duration::from_millis(20)),
        );
        let admin = UserId::new();
        let loan = engine
            .create_venue_loan(NewVenueLoan {
                room: ROOM,
                borrower_unit: UNIT,
                borrower: admin,
                event_name: "Seminar".into(),
                start: t0() + chrono::Duration::minutes(30),
                end: t0() + chrono::Duration::hours(2),
                notes: String::new(),
            })
            .unwrap();
        assert!(engine.approve_venue_loan(loan, admin).unwrap().is_applied());
        clock.set(t0() + chrono::Duration::hours(1));

        let engine = Arc::new(engine);
        let handle = VenueLoanScheduler::spawn(engine.clone()).unwrap().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.stats().started == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let stats = handle.stats();
        handle.shutdown();

        assert_eq!(stats.started, 1);
        assert_eq!(
            engine.venue_loan(loan).unwrap().unwrap().status(),
            VenueLoanStatus::Active
        );
    }

    #[test]
    fn disabled_scheduler_does_not_spawn() {
        let (engine, _bus, _clock) = setup();
        assert!(VenueLoanScheduler::spawn(Arc::new(engine)).unwrap().is_none());
    }

    #[test]
    fn concurrent_completions_apply_exactly_once() {
        let (engine, bus, _clock) = setup();
        let admin = UserId::new();
        let item = router(&engine);
        let id = open_request(&engine, admin, vec![line(item, 10)]);
        engine
            .receive_delivery(id, admin, &delivery("INV-C", 1, 10, vec![]))
            .unwrap();
        let sub = bus.subscribe();

        let engine = &engine;
        let outcomes: Vec<Outcome> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || engine.complete_request(id, admin, WAREHOUSE).unwrap())
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_rejected()).count(), 7);
        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 10);
        assert_eq!(engine.movements_for(item, WAREHOUSE).unwrap().len(), 1);
        engine.verify_ledger().unwrap();
        assert_eq!(event_types(&sub), vec!["procurement.request.completed"]);
    }

    #[test]
    fn manual_stock_out_cannot_exceed_on_hand() {
        let (engine, bus, _clock) = setup();
        let admin = UserId::new();
        let item = router(&engine);
        let tx = |kind: MovementKind, quantity: u64| StockTransaction {
            item,
            warehouse: WAREHOUSE,
            kind,
            quantity,
            note: "cycle count".into(),
        };

        assert!(engine
            .record_stock_transaction(tx(MovementKind::In, 4), admin)
            .unwrap()
            .is_applied());
        let sub = bus.subscribe();

        let refused = engine
            .record_stock_transaction(tx(MovementKind::Out, 5), admin)
            .unwrap();
        assert!(refused.is_rejected());
        assert!(refused.message().contains("insufficient stock"), "{refused:?}");
        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 4);
        assert_eq!(engine.movements_for(item, WAREHOUSE).unwrap().len(), 1);
        engine.verify_ledger().unwrap();
        assert!(sub.drain().is_empty());

        assert!(engine
            .record_stock_transaction(tx(MovementKind::Out, 3), admin)
            .unwrap()
            .is_applied());
        assert!(engine
            .record_stock_transaction(tx(MovementKind::Out, 0), admin)
            .unwrap()
            .is_rejected());
        assert_eq!(engine.get_quantity(item, WAREHOUSE).unwrap(), 1);
        let kinds: Vec<MovementKind> = engine
            .movements_for(item, WAREHOUSE)
            .unwrap()
            .iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds, vec![MovementKind::In, MovementKind::Out]);
        engine.verify_ledger().unwrap();
        assert_eq!(event_types(&sub), vec!["inventory.stock.recorded"]);

        let unknown = StockTransaction {
            item: CatalogItemId::new(99),
            ..tx(MovementKind::In, 1)
        };
        assert_eq!(
            engine.record_stock_transaction(unknown, admin).unwrap(),
            Outcome::rejected("catalog item 99 not found")
        );
    }

    #[test]
    fn asset_request_is_closed_by_the_batch_that_delivered_it() {
        let (engine, bus, _clock) = setup();
        let admin = UserId::new();
        let units = procure(&engine, admin, &serials("Q", 1..=2));
        let item = engine.instance(units[0]).unwrap().unwrap().catalog_item().unwrap();

        let ask = |unit: UnitId| NewAssetRequest {
            unit,
            requested_by: UserId::new(),
            notes: None,
            items: vec![RequestedAsset {
                item,
                quantity: 2,
                room: Some(ROOM),
                room_notes: None,
            }],
        };
        let request = engine.create_asset_request(ask(UNIT)).unwrap();
        let elsewhere = engine.create_asset_request(ask(UnitId::new(99))).unwrap();
        let sub = bus.subscribe();

        let batch = install_in_room(&engine, admin, &units);
        assert!(engine
            .complete_asset_request(request, admin, batch)
            .unwrap()
            .is_rejected());

        assert!(engine
            .verify_asset_request(request, admin, Some("stock on hand".into()))
            .unwrap()
            .is_applied());
        assert!(engine
            .complete_asset_request(request, admin, BatchId::new(77))
            .unwrap()
            .is_rejected());
        assert!(engine
            .complete_asset_request(request, admin, batch)
            .unwrap()
            .is_applied());

        let closed = engine.asset_request(request).unwrap().unwrap();
        assert_eq!(closed.status(), AssetRequestStatus::Completed);
        assert_eq!(closed.fulfilled_by(), Some(batch));

        assert!(engine
            .verify_asset_request(elsewhere, admin, None)
            .unwrap()
            .is_applied());
        let wrong_unit = engine
            .complete_asset_request(elsewhere, admin, batch)
            .unwrap();
        assert!(wrong_unit.message().contains("not to the requesting unit"));
        assert_eq!(
            engine.asset_request(elsewhere).unwrap().unwrap().status(),
            AssetRequestStatus::Verified
        );

        let types: Vec<String> = event_types(&sub)
            .into_iter()
            .filter(|t| t.starts_with("distribution.asset_request"))
            .collect();
        assert_eq!(
            types,
            vec![
                "distribution.asset_request.verified",
                "distribution.asset_request.completed",
                "distribution.asset_request.verified",
            ]
        );

        let err = engine
            .create_asset_request(NewAssetRequest {
                items: vec![RequestedAsset {
                    item: CatalogItemId::new(404),
                    quantity: 1,
                    room: None,
                    room_notes: None,
                }],
                ..ask(UNIT)
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::NotFound(_))));
    }

    #[test]
    fn unit_history_follows_one_unit_from_receipt_to_return() {
        let (engine, _bus, _clock) = setup();
        let admin = UserId::new();
        let units = procure(&engine, admin, &serials("T", 1..=1));
        let unit = units[0];
        install_in_room(&engine, admin, &units);

        let batch = engine
            .create_return_batch(NewReturnBatch {
                warehouse: WAREHOUSE,
                return_date: t0().date_naive(),
                created_by: admin,
                notes: String::new(),
                items: vec![NewReturnItem {
                    instance: unit,
                    unit: UNIT,
                    reason: None,
                    condition: Condition::Damaged,
                    condition_notes: Some("cracked casing".into()),
                }],
            })
            .unwrap();
        assert!(engine.confirm_return_batch(batch, admin).unwrap().is_applied());

        let trail = engine.unit_history(unit).unwrap();
        let statuses: Vec<(Option<ItemStatus>, ItemStatus)> = trail
            .iter()
            .map(|m| (m.status_before, m.status_after))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (None, ItemStatus::Available),
                (Some(ItemStatus::Available), ItemStatus::Available),
                (Some(ItemStatus::Available), ItemStatus::Processing),
                (Some(ItemStatus::Processing), ItemStatus::InUse),
                (Some(ItemStatus::InUse), ItemStatus::Returned),
            ]
        );

        let stocked = Some(Location::Warehouse { warehouse: WAREHOUSE });
        assert!(trail[0].note.contains("INV-P"));
        assert_eq!((trail[1].from, trail[1].to), (None, stocked));
        assert_eq!(
            trail[3].to,
            Some(Location::Unit {
                unit: UNIT,
                room: Some(ROOM)
            })
        );
        assert_eq!(trail[4].to, stocked);
        assert!(trail.iter().all(|m| m.actor == Actor::User(admin)));
        assert!(trail.iter().all(|m| m.serial_unit == trail[0].serial_unit));
    }

    #[test]
    fn configured_serial_unit_prefix_is_used() {
        let (engine, _bus, _clock) = setup_with(
            EngineConfig::default()
                .with_scheduler_enabled(false)
                .with_serial_unit_prefix("UNIT"),
        );
        let admin = UserId::new();
        let item = router(&engine);
        let id = open_request(&engine, admin, vec![line(item, 1)]);
        engine
            .receive_delivery(id, admin, &delivery("INV-U", 1, 1, vec!["PX-1".into()]))
            .unwrap();

        let unit = engine.find_by_serial("PX-1").unwrap().unwrap();
        assert_eq!(unit.serial_unit(), "UNIT-20240301-000001");
    }

    #[test]
    fn workflow_envelopes_survive_json() {
        let (engine, bus, _clock) = setup();
        let sub = bus.subscribe();
        let admin = UserId::new();
        let item = router(&engine);
        open_request(&engine, admin, vec![line(item, 2)]);

        let envelopes = sub.drain();
        assert_eq!(envelopes.len(), 2);
        for envelope in &envelopes {
            let json = serde_json::to_string(envelope).unwrap();
            let back: WorkflowEnvelope = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, envelope);
        }

        let value = serde_json::to_value(&envelopes[1]).unwrap();
        assert_eq!(value["payload"]["event_type"], "procurement.request.approved");
        assert_eq!(value["entity_type"], "procurement.request");
    }
}
