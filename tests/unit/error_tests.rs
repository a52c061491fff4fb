use agent_arena::AppError;

#[test]
fn display_prefixes_the_category() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Db("x".into()), "db: x"),
        (AppError::Capacity("x".into()), "capacity: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Conflict("x".into()), "conflict: x"),
        (AppError::InvalidInput("x".into()), "invalid input: x"),
        (AppError::Container("x".into()), "container: x"),
        (AppError::Agent("x".into()), "agent: x"),
        (AppError::Process("x".into()), "process: x"),
        (AppError::Bridge("x".into()), "bridge: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn docker_404_maps_to_not_found() {
    let err: AppError = bollard::errors::Error::DockerResponseServerError {
        status_code: 404,
        message: "No such container: env-1".into(),
    }
    .into();
    assert!(matches!(err, AppError::NotFound(ref msg) if msg.contains("env-1")), "{err}");
}

#[test]
fn other_docker_errors_map_to_container() {
    let err: AppError = bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: "daemon exploded".into(),
    }
    .into();
    assert!(matches!(err, AppError::Container(_)), "{err}");
}

#[test]
fn io_errors_map_to_io() {
    let err: AppError = std::io::Error::other("disk").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "disk"));
}
