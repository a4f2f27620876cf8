mod support;

use unirank::GatewayError;
use unirank::gateway::{BatchEntry, ListRequest, Operation, SearchSpec, VoteRequest};
use unirank::schema::EntityKind;

#[test]
fn kinds_are_stable_names() {
    let cases = [
        (GatewayError::MalformedSpecification("x".into()), "MalformedSpecification"),
        (GatewayError::InvalidPagination("x".into()), "InvalidPagination"),
        (GatewayError::StoreUnavailable("x".into()), "StoreUnavailable"),
        (GatewayError::QueryRejected("x".into()), "QueryRejected"),
        (GatewayError::NotFound("x".into()), "NotFound"),
        (GatewayError::Config("x".into()), "Config"),
    ];
    for (err, kind) in cases {
        assert_eq!(err.kind(), kind);
        assert!(err.to_string().ends_with(": x"));
    }
}

#[test]
fn json_and_io_errors_convert() {
    let json: GatewayError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert_eq!(json.kind(), "Json");
    let io: GatewayError = std::io::Error::other("disk gone").into();
    assert!(matches!(io, GatewayError::Io(ref m) if m.contains("disk gone")));
}

#[test]
fn batch_reports_each_failure_by_path() {
    let (_, gw) = support::gateway();
    let resp = gw.execute_batch(vec![
        BatchEntry::new("ok", Operation::ListEntities(ListRequest::new(Some(1), None, SearchSpec::text("graz")))),
        BatchEntry::new("pipe", Operation::ListEntities(ListRequest::new(None, None, SearchSpec::Pipeline("[]".into())))),
        BatchEntry::new("vote", Operation::UpdateVote(VoteRequest::new(EntityKind::City, "nope", None, 1))),
        BatchEntry::new("fb", Operation::SubmitFeedback { contact: String::new(), message: "m".into() }),
    ]);
    assert_eq!(resp.data["ok"][0]["_id"], "u3");
    let kinds: Vec<(&str, &str)> = resp.errors.iter().map(|e| (e.path.as_str(), e.kind.as_str())).collect();
    assert_eq!(kinds, vec![("pipe", "InvalidPagination"), ("vote", "NotFound"), ("fb", "MalformedSpecification")]);
    for path in ["pipe", "vote", "fb"] {
        assert!(resp.data[path].is_null());
    }
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["errors"][1]["path"], "vote");
}
