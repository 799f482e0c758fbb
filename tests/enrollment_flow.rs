//! End-to-end CMP transaction tests
//!
//! A scripted transport plays the server side of each exchange; the
//! mock clock turns poll sleeps into log entries.

mod common;

use common::*;
use cmp_client::prelude::*;

// ============================================================================
// Scenario: plain enrollment with explicit confirmation
// ============================================================================

#[test]
fn happy_ir_with_cert_conf_round_trip() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut h = harness(vec![
        ip(PkiStatus::Accepted, Some(&cert), false),
        pki_conf(),
    ]);
    h.ctx.set_new_key(key);

    let enrolled = h.ctx.exec_ir().unwrap();

    assert_eq!(enrolled, cert);
    assert_eq!(h.ctx.new_cert(), Some(&cert));
    assert_eq!(h.ctx.status(), Some(PkiStatus::Accepted));
    assert!(h.ctx.fail_info().is_empty());
    assert_eq!(
        *h.sent.lock().unwrap(),
        vec![BodyType::Ir, BodyType::CertConf]
    );
}

#[test]
fn implicit_confirm_skips_cert_conf() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut h = harness(vec![ip(PkiStatus::Accepted, Some(&cert), true)]);
    h.ctx.set_new_key(key);

    let enrolled = h.ctx.exec_ir().unwrap();

    assert_eq!(enrolled, cert);
    assert_eq!(*h.sent.lock().unwrap(), vec![BodyType::Ir]);
}

#[test]
fn disable_confirm_skips_cert_conf() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut h = harness(vec![ip(PkiStatus::Accepted, Some(&cert), false)]);
    h.ctx.set_new_key(key);
    h.ctx.config.disable_confirm = true;

    h.ctx.exec_ir().unwrap();
    assert_eq!(*h.sent.lock().unwrap(), vec![BodyType::Ir]);
}

// ============================================================================
// Scenario: waiting then accepted, blocking driver
// ============================================================================

#[test]
fn waiting_then_accepted_polls_and_sleeps() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut h = harness(vec![
        ip(PkiStatus::Waiting, None, false),
        poll_rep(1),
        cp(PkiStatus::Accepted, Some(&cert), false),
        pki_conf(),
    ]);
    h.ctx.set_new_key(key);

    let enrolled = h.ctx.exec_ir().unwrap();

    assert_eq!(enrolled, cert);
    assert_eq!(*h.sleeps.lock().unwrap(), vec![1]);
    assert_eq!(
        *h.sent.lock().unwrap(),
        vec![
            BodyType::Ir,
            BodyType::PollReq,
            BodyType::PollReq,
            BodyType::CertConf,
        ]
    );
}

#[test]
fn cert_rep_waiting_again_after_poll_keeps_polling() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut h = harness(vec![
        ip(PkiStatus::Waiting, None, false),
        // the ip received after polling may itself still say 'waiting'
        ip(PkiStatus::Waiting, None, false),
        poll_rep(2),
        ip(PkiStatus::Accepted, Some(&cert), true),
    ]);
    h.ctx.set_new_key(key);

    let enrolled = h.ctx.exec_ir().unwrap();
    assert_eq!(enrolled, cert);
    assert_eq!(*h.sleeps.lock().unwrap(), vec![2]);
}

// ============================================================================
// Scenario: non-blocking enrollment via try_certreq
// ============================================================================

#[test]
fn try_certreq_hands_back_check_after_then_aborts() {
    init_logging();
    let (_, key) = shared_cert().clone();
    let mut h = harness(vec![
        ip(PkiStatus::Waiting, None, false),
        poll_rep(30),
        pki_conf(),
    ]);
    h.ctx.set_new_key(key);

    let outcome = h.ctx.try_certreq(Some(RequestKind::Ir)).unwrap();
    let CertReqOutcome::Waiting { check_after } = outcome else {
        panic!("expected waiting outcome, got {outcome:?}");
    };
    assert_eq!(check_after, 30);
    assert_eq!(h.ctx.status(), Some(PkiStatus::Waiting));
    assert!(h.sleeps.lock().unwrap().is_empty());

    // abort: an error body goes out and the server confirms
    let outcome = h.ctx.try_certreq(None).unwrap();
    assert!(matches!(outcome, CertReqOutcome::Aborted));
    assert_eq!(
        *h.sent.lock().unwrap(),
        vec![BodyType::Ir, BodyType::PollReq, BodyType::Error]
    );

    let captured = h.captured.lock().unwrap();
    let PkiBody::Error(emc) = &captured[2].body else {
        panic!("expected error body");
    };
    assert_eq!(emc.status.status().unwrap(), PkiStatus::Rejection);
    assert_eq!(emc.status.status_strings(), ["polling aborted"]);
    assert_eq!(emc.error_details, ["by application"]);
}

#[test]
fn try_certreq_resumes_polling_to_completion() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut h = harness(vec![
        ip(PkiStatus::Waiting, None, false),
        poll_rep(5),
        cp(PkiStatus::Accepted, Some(&cert), true),
    ]);
    h.ctx.set_new_key(key);

    let first = h.ctx.try_certreq(Some(RequestKind::Ir)).unwrap();
    assert!(matches!(
        first,
        CertReqOutcome::Waiting { check_after: 5 }
    ));

    let second = h.ctx.try_certreq(Some(RequestKind::Ir)).unwrap();
    let CertReqOutcome::Enrolled(enrolled) = second else {
        panic!("expected enrollment, got {second:?}");
    };
    assert_eq!(enrolled, cert);
    assert!(h.sleeps.lock().unwrap().is_empty());
}

// ============================================================================
// Scenario: server answers with an error body
// ============================================================================

#[test]
fn server_error_is_saved_and_rendered() {
    init_logging();
    let (_, key) = shared_cert().clone();
    let mut h = harness(vec![error_body(
        PkiStatus::Rejection,
        FailInfo::single(FailureInfo::BadCertTemplate),
        Some("bad subject"),
        None,
        vec![],
    )]);
    h.ctx.set_new_key(key);

    let err = h.ctx.exec_ir().unwrap_err();
    assert!(matches!(err, CmpError::ReceivedError(_)));
    assert_eq!(
        h.ctx.render_status().unwrap(),
        "PKIStatus: rejection; PKIFailureInfo: badCertTemplate; StatusString: \"bad subject\""
    );
    assert_eq!(h.ctx.status(), Some(PkiStatus::Rejection));
    assert!(h.ctx.fail_info().contains(FailureInfo::BadCertTemplate));
}

// ============================================================================
// Scenario: key mismatch with the default confirmation callback
// ============================================================================

#[test]
fn key_mismatch_sends_cert_conf_and_fails() {
    init_logging();
    let (cert, _) = make_cert("issued.test");
    let (_, wrong_key) = make_cert("someone-else.test");
    let mut h = harness(vec![
        ip(PkiStatus::Accepted, Some(&cert), false),
        pki_conf(),
    ]);
    h.ctx.set_new_key(wrong_key);
    h.ctx.set_cert_confirm(Box::new(DefaultCertConfirm));

    let err = h.ctx.exec_ir().unwrap_err();
    assert!(matches!(err, CmpError::CertificateNotAccepted { .. }));
    assert!(h.ctx.fail_info().contains(FailureInfo::IncorrectData));
    assert_eq!(
        *h.sent.lock().unwrap(),
        vec![BodyType::Ir, BodyType::CertConf]
    );

    // the certConf carried the rejection verdict
    let captured = h.captured.lock().unwrap();
    let PkiBody::CertConf(conf) = &captured[1].body else {
        panic!("expected certConf body");
    };
    assert_eq!(conf.status.status().unwrap(), PkiStatus::Rejection);
    assert!(conf
        .status
        .failure_bits()
        .contains(FailureInfo::IncorrectData));
}

// ============================================================================
// Scenario: revocation
// ============================================================================

#[test]
fn rr_happy_path_returns_old_cert() {
    init_logging();
    let (old_cert, _) = make_cert("revoke-me.test");
    let cert_id = old_cert.cert_id().unwrap();
    let mut h = harness(vec![rp(PkiStatus::Accepted, Some(vec![cert_id]), None)]);
    h.ctx.set_old_cert(old_cert.clone());

    let revoked = h.ctx.exec_rr().unwrap();
    assert_eq!(revoked, old_cert);
    assert_eq!(h.ctx.status(), Some(PkiStatus::Accepted));
    assert_eq!(*h.sent.lock().unwrap(), vec![BodyType::Rr]);
}

#[test]
fn rr_wrong_serial_is_fatal_unless_tolerated() {
    init_logging();
    let (old_cert, _) = make_cert("revoke-me.test");
    let mut wrong_id = old_cert.cert_id().unwrap();
    wrong_id.serial = vec![0xde, 0xad];

    let mut h = harness(vec![rp(
        PkiStatus::Accepted,
        Some(vec![wrong_id.clone()]),
        None,
    )]);
    h.ctx.set_old_cert(old_cert.clone());
    let err = h.ctx.exec_rr().unwrap_err();
    assert!(matches!(err, CmpError::WrongSerialInRp));

    // the runtime tolerance policy downgrades the mismatch to a warning
    let mut h = harness(vec![rp(PkiStatus::Accepted, Some(vec![wrong_id]), None)]);
    h.ctx.set_old_cert(old_cert.clone());
    h.ctx.config.tolerate_rp_mismatch = true;
    assert_eq!(h.ctx.exec_rr().unwrap(), old_cert);
}

#[test]
fn rr_rejects_extra_status_entries_and_crls() {
    init_logging();
    let (old_cert, _) = make_cert("revoke-me.test");

    let mut two_status = rp(PkiStatus::Accepted, None, None);
    if let PkiBody::Rp(content) = &mut two_status.body {
        content
            .status
            .push(PkiStatusInfo::new(PkiStatus::Accepted, FailInfo::empty(), None));
    }
    let mut h = harness(vec![two_status]);
    h.ctx.set_old_cert(old_cert.clone());
    assert!(matches!(
        h.ctx.exec_rr(),
        Err(CmpError::WrongRpComponentCount(2))
    ));

    let two_crls = rp(
        PkiStatus::Accepted,
        None,
        Some(vec![Crl(vec![1]), Crl(vec![2])]),
    );
    let mut h = harness(vec![two_crls]);
    h.ctx.set_old_cert(old_cert);
    assert!(matches!(
        h.ctx.exec_rr(),
        Err(CmpError::WrongRpComponentCount(2))
    ));
}

#[test]
fn rr_rejection_status_fails() {
    init_logging();
    let (old_cert, _) = make_cert("revoke-me.test");
    let mut h = harness(vec![rp(PkiStatus::Rejection, None, None)]);
    h.ctx.set_old_cert(old_cert);
    assert!(matches!(
        h.ctx.exec_rr(),
        Err(CmpError::RequestRejectedByServer)
    ));
    assert_eq!(h.ctx.status(), Some(PkiStatus::Rejection));
}

// ============================================================================
// Assorted protocol edges
// ============================================================================

#[test]
fn rejection_in_cert_response_surfaces_after_saving_status() {
    init_logging();
    let (_, key) = shared_cert().clone();
    let mut h = harness(vec![ip(PkiStatus::Rejection, None, false)]);
    h.ctx.set_new_key(key);

    let err = h.ctx.exec_ir().unwrap_err();
    assert!(matches!(err, CmpError::RequestRejectedByServer));
    assert_eq!(h.ctx.status(), Some(PkiStatus::Rejection));
    assert!(!h.ctx.diagnostics().is_empty());
}

#[test]
fn key_update_warning_only_valid_for_kur() {
    init_logging();
    let (cert, key) = shared_cert().clone();

    let mut h = harness(vec![ip(PkiStatus::KeyUpdateWarning, Some(&cert), true)]);
    h.ctx.set_new_key(key.clone());
    assert!(matches!(
        h.ctx.exec_ir(),
        Err(CmpError::EncounteredKeyUpdateWarning)
    ));

    let mut h = harness(vec![kup(PkiStatus::KeyUpdateWarning, Some(&cert), true)]);
    h.ctx.set_new_key(key);
    h.ctx.set_old_cert(cert.clone());
    assert_eq!(h.ctx.exec_kur().unwrap(), cert);
}

#[test]
fn granted_cert_missing_from_response_is_an_error() {
    init_logging();
    let (_, key) = shared_cert().clone();
    let mut h = harness(vec![ip(PkiStatus::Accepted, None, true)]);
    h.ctx.set_new_key(key);
    assert!(matches!(
        h.ctx.exec_ir(),
        Err(CmpError::CertificateNotFound)
    ));
}

#[test]
fn multiple_cert_responses_are_rejected() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let mut resp = ip(PkiStatus::Accepted, Some(&cert), true);
    if let PkiBody::Ip(rep) = &mut resp.body {
        let extra = rep.responses[0].clone();
        rep.responses.push(extra);
    }
    let mut h = harness(vec![resp]);
    h.ctx.set_new_key(key);
    assert!(matches!(
        h.ctx.exec_ir(),
        Err(CmpError::MultipleResponsesNotSupported)
    ));
}

#[test]
fn p10cr_learns_request_id_from_response() {
    init_logging();
    let (cert, _) = shared_cert().clone();
    let mut resp = cp(PkiStatus::Accepted, Some(&cert), true);
    if let PkiBody::Cp(rep) = &mut resp.body {
        rep.responses[0].cert_req_id = 7;
    }
    let mut h = harness(vec![resp]);
    h.ctx.set_csr(vec![0x30, 0x82, 0x01, 0x00]);

    let enrolled = h.ctx.exec_p10cr().unwrap();
    assert_eq!(enrolled, cert);
}

#[test]
fn p10cr_cert_conf_echoes_the_learned_request_id() {
    init_logging();
    let (cert, _) = shared_cert().clone();
    let mut resp = cp(PkiStatus::Accepted, Some(&cert), false);
    if let PkiBody::Cp(rep) = &mut resp.body {
        rep.responses[0].cert_req_id = 7;
    }
    let mut h = harness(vec![resp, pki_conf()]);
    h.ctx.set_csr(vec![0x30, 0x82, 0x01, 0x00]);

    let enrolled = h.ctx.exec_p10cr().unwrap();
    assert_eq!(enrolled, cert);
    assert_eq!(
        *h.sent.lock().unwrap(),
        vec![BodyType::P10cr, BodyType::CertConf]
    );

    let captured = h.captured.lock().unwrap();
    let PkiBody::CertConf(conf) = &captured[1].body else {
        panic!("expected certConf body");
    };
    assert_eq!(conf.cert_req_id, 7);
}

#[test]
fn transport_failure_is_annotated() {
    init_logging();
    let (_, key) = shared_cert().clone();
    let mut h = harness(vec![]);
    h.ctx.set_new_key(key);
    let err = h.ctx.exec_ir().unwrap_err();
    assert!(matches!(
        err,
        CmpError::Transfer {
            request: BodyType::Ir,
            expected: BodyType::Ip,
        }
    ));
}

#[test]
fn ca_pubs_and_extra_certs_land_in_context() {
    init_logging();
    let (cert, key) = shared_cert().clone();
    let (ca_cert, _) = make_cert("ca.test");
    let (extra, _) = make_cert("extra.test");

    let mut resp = ip(PkiStatus::Accepted, Some(&cert), true);
    if let PkiBody::Ip(rep) = &mut resp.body {
        rep.ca_pubs.push(ca_cert.clone());
    }
    resp.extra_certs.push(extra.clone());

    let mut h = harness(vec![resp]);
    h.ctx.set_new_key(key);
    h.ctx.exec_ir().unwrap();

    assert_eq!(h.ctx.ca_pubs(), [ca_cert]);
    assert_eq!(h.ctx.extra_certs_in(), [extra]);
}
