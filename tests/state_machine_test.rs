use payrail::payments::types::TransactionStatus;

const ALL_STATUSES: [TransactionStatus; 5] = [
    TransactionStatus::Pending,
    TransactionStatus::Processing,
    TransactionStatus::Success,
    TransactionStatus::Failed,
    TransactionStatus::Cancelled,
];

#[test]
fn only_the_specified_edges_are_legal() {
    let legal = [
        (TransactionStatus::Pending, TransactionStatus::Processing),
        (TransactionStatus::Pending, TransactionStatus::Cancelled),
        (TransactionStatus::Processing, TransactionStatus::Success),
        (TransactionStatus::Processing, TransactionStatus::Failed),
    ];

    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let expected = legal.contains(&(from, to));
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "transition {} -> {}",
                from,
                to
            );
        }
    }
}

#[test]
fn terminal_states_have_no_outgoing_edges() {
    for status in ALL_STATUSES {
        if status.is_terminal() {
            assert!(status.valid_transitions().is_empty(), "{} is terminal", status);
        } else {
            assert!(!status.valid_transitions().is_empty());
        }
    }
}

#[test]
fn every_path_from_pending_ends_terminal() {
    // Walk the transition graph exhaustively; each maximal path must end in
    // a terminal state and never revisit a status.
    fn walk(path: &mut Vec<TransactionStatus>) {
        let current = *path.last().unwrap();
        let next = current.valid_transitions();
        if next.is_empty() {
            assert!(current.is_terminal(), "dead end at non-terminal {}", current);
            return;
        }
        for &target in next {
            assert!(!path.contains(&target), "cycle through {}", target);
            path.push(target);
            walk(path);
            path.pop();
        }
    }

    walk(&mut vec![TransactionStatus::Pending]);
}

#[test]
fn db_status_strings_round_trip() {
    for status in ALL_STATUSES {
        let stored = status.as_str().to_string();
        assert_eq!(stored.parse::<TransactionStatus>(), Ok(status));
    }
    assert!("REFUNDED".parse::<TransactionStatus>().is_err());
}
