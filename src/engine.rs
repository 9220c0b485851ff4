//! Request-execution engine
//!
//! [`Engine`] owns everything a request needs: the connection pool, the
//! published route table, the template renderer and the structural validator.
//! [`Engine::execute`] runs one route script end to end inside a single
//! transaction:
//!
//! ```text
//! acquire connection -> BEGIN -> build context -> run statements
//!     -> assemble response (render) -> drop relations -> COMMIT
//! ```
//!
//! Any failure before COMMIT drops the transaction, which rolls it back.
//! Everything here is blocking; the HTTP layer calls it from a blocking task.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::http;
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, ServerArgs, ServerConfig};
use crate::db::{CancelFlag, Database, ExtensionSet};
use crate::error::{Result, WtfError};
use crate::executor::{SchemaValidator, StatementExecutor, StructuralValidator};
use crate::request::{IncomingRequest, RequestContext};
use crate::response::{JinjaRenderer, ResponseAssembler, ResponsePlan, TemplateRenderer};
use crate::routing::{Route, RouteDirectory, RouteEntry, RouteMatch, RouteTable, SqliteRouteDirectory};
use crate::script::{parse_script, ParsedStatement};

/// Result of [`Engine::dispatch`]
#[derive(Debug)]
pub enum Dispatch {
    Handled(ResponsePlan),
    Redirect(String),
    MethodNotAllowed(Vec<&'static str>),
    NotFound,
}

pub struct Engine {
    config: EngineConfig,
    db: Database,
    routes: RwLock<Arc<RouteTable>>,
    rebuild_lock: Mutex<()>,
    directory: Option<Arc<dyn RouteDirectory>>,
    renderer: Arc<dyn TemplateRenderer>,
    validator: Arc<dyn StructuralValidator>,
    environment: Vec<(String, String)>,
}

impl Engine {
    /// Engine with the default renderer and validator, an environment
    /// snapshot taken now, and an empty route table
    pub fn new(config: EngineConfig, db: Database) -> Self {
        let environment = exposed_environment(&config.env_prefix, std::env::vars());
        Self {
            renderer: Arc::new(JinjaRenderer::new(&config.web_root)),
            validator: Arc::new(SchemaValidator::new()),
            routes: RwLock::new(Arc::new(RouteTable::default())),
            rebuild_lock: Mutex::new(()),
            directory: None,
            environment,
            config,
            db,
        }
    }

    /// Open the database, persist routes to `wtf_routes` and build the first table
    pub fn open(config: &ServerConfig, extensions: ExtensionSet) -> Result<Self> {
        let db = Database::open(config.database.clone(), extensions)?;
        let directory = SqliteRouteDirectory::new(db.clone())?;
        let engine = Self::new(config.engine.clone(), db).with_directory(Arc::new(directory));
        engine.rebuild_routes()?;
        Ok(engine)
    }

    pub fn with_directory(mut self, directory: Arc<dyn RouteDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn StructuralValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the environment snapshot; entries outside the prefix and the
    /// server's own settings are dropped
    pub fn with_environment(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.environment = exposed_environment(&self.config.env_prefix, vars);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn web_root(&self) -> &Path {
        &self.config.web_root
    }

    // ── Routes ──────────────────────────────────────────────────────────

    /// Build a fresh route table and publish it.
    ///
    /// Concurrent calls run one at a time. If the build fails the previous
    /// table stays published. Returns the number of routes published.
    pub fn rebuild_routes(&self) -> Result<usize> {
        let _guard = self.rebuild_lock.lock();
        let start = Instant::now();
        let table = RouteTable::build(&self.config.web_root)?;

        if let Some(directory) = &self.directory {
            if let Err(e) = directory.replace_all(&table.entries()) {
                warn!(error = %e, "Failed to persist route directory");
            }
        }

        let count = table.len();
        info!(
            routes = count,
            rejected = table.rejected().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            root = %self.config.web_root.display(),
            "Route table rebuilt"
        );
        *self.routes.write() = Arc::new(table);
        Ok(count)
    }

    /// The currently published table
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    pub fn route_entries(&self) -> Vec<RouteEntry> {
        self.routes().entries()
    }

    pub fn lookup(&self, method: &http::Method, path: &str) -> RouteMatch {
        self.routes().lookup(method, path)
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Route `request` and run the matching script
    pub fn dispatch(&self, mut request: IncomingRequest, cancel: &CancelFlag) -> Result<Dispatch> {
        match self.lookup(&request.method, &request.path) {
            RouteMatch::Found { route, params } => {
                request.path_params = params;
                self.execute(&route, &request, cancel).map(Dispatch::Handled)
            }
            RouteMatch::Redirect(location) => Ok(Dispatch::Redirect(location)),
            RouteMatch::MethodNotAllowed(allowed) => Ok(Dispatch::MethodNotAllowed(allowed)),
            RouteMatch::NotFound => Ok(Dispatch::NotFound),
        }
    }

    /// Run `route` for `request`, whose path parameters are already set
    pub fn execute(&self, route: &Route, request: &IncomingRequest, cancel: &CancelFlag) -> Result<ResponsePlan> {
        let start = Instant::now();
        let statements = parse_script(&route.script);

        let mut conn = self.db.acquire(cancel)?;
        cancel.attach(&conn);
        let outcome = self.run_transaction(&mut conn, &statements, request, cancel);
        CancelFlag::detach(&conn);

        if !conn.is_autocommit() {
            warn!(route = %route.pattern, "Discarding connection left inside a transaction");
            conn.discard();
        }

        match &outcome {
            Ok(plan) => debug!(
                method = %request.method,
                route = %route.pattern,
                file = %route.source_file,
                status = plan.status.as_u16(),
                statements = statements.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request executed"
            ),
            Err(e) => debug!(
                method = %request.method,
                route = %route.pattern,
                error = %e,
                "Request rolled back"
            ),
        }
        outcome
    }

    fn run_transaction(
        &self,
        conn: &mut Connection,
        statements: &[ParsedStatement],
        request: &IncomingRequest,
        cancel: &CancelFlag,
    ) -> Result<ResponsePlan> {
        let tx = conn.transaction()?;
        let mut context = RequestContext::build(&tx, request, &self.environment, &self.config)?;

        let buckets = StatementExecutor::new(&tx, self.validator.as_ref(), self.config.blob_encoding)
            .with_cancel(cancel)
            .run(statements, &mut context.variables)?;

        let plan = ResponseAssembler::new(self.renderer.as_ref()).assemble(&tx, &buckets, request.host())?;

        context.relations.teardown(&tx)?;
        tx.commit().map_err(|e| {
            error!(error = %e, path = %request.path, "Commit failed");
            WtfError::Commit(e.to_string())
        })?;
        Ok(plan)
    }
}

/// Variables under `prefix`, minus the ones that configure the server itself
fn exposed_environment(
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    let settings = ServerArgs::setting_env_names();
    vars.into_iter()
        .filter(|(name, _)| name.starts_with(prefix) && !settings.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use axum::http::{Method, StatusCode};
    use std::fs;

    struct Fixture {
        _root: tempfile::TempDir,
        engine: Engine,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let path = root.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let db = Database::open(
            DatabaseConfig::new(root.path().join("test.db")),
            ExtensionSet::builtin(),
        )
        .unwrap();
        db.with_connection(|conn| {
            conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);")?;
            Ok(())
        })
        .unwrap();
        let engine = Engine::new(EngineConfig::new(root.path()), db)
            .with_environment(vec![("WTF_SITE".to_string(), "demo".to_string())]);
        engine.rebuild_routes().unwrap();
        Fixture { _root: root, engine }
    }

    fn handled(engine: &Engine, request: IncomingRequest) -> ResponsePlan {
        match engine.dispatch(request, &CancelFlag::new()).unwrap() {
            Dispatch::Handled(plan) => plan,
            other => panic!("expected a handled request, got {other:?}"),
        }
    }

    fn body_json(plan: &ResponsePlan) -> serde_json::Value {
        serde_json::from_slice(&plan.body).unwrap()
    }

    fn note_count(engine: &Engine) -> i64 {
        engine
            .database()
            .with_connection(|conn| Ok(conn.query_row("SELECT count(*) FROM notes", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_server_settings_hidden_from_env() {
        let vars = vec![
            ("WTF_SITE".to_string(), "demo".to_string()),
            ("WTF_DB".to_string(), "/srv/site.db".to_string()),
            ("WTF_MAX_BODY_BYTES".to_string(), "1024".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        assert_eq!(
            exposed_environment("WTF_", vars),
            vec![("WTF_SITE".to_string(), "demo".to_string())]
        );
    }

    #[test]
    fn test_greeting_from_query() {
        let f = fixture(&[("hello.get.sql", "SELECT :name AS greeting;")]);
        let plan = handled(&f.engine, IncomingRequest::new(Method::GET, "/hello/?name=Ada"));
        assert_eq!(plan.status, StatusCode::OK);
        assert_eq!(body_json(&plan), serde_json::json!([{"greeting": "Ada"}]));
    }

    #[test]
    fn test_status_from_response_meta() {
        let f = fixture(&[(
            "notes/index.post.sql",
            "INSERT INTO notes (body) VALUES (:body);\n\
             INSERT INTO response_meta VALUES ('status', '201');",
        )]);
        let request = IncomingRequest::new(Method::POST, "/notes/")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("body=hello");
        let plan = handled(&f.engine, request);
        assert_eq!(plan.status, StatusCode::CREATED);
        assert_eq!(body_json(&plan), serde_json::json!([]));
        assert_eq!(note_count(&f.engine), 1);
    }

    #[test]
    fn test_failure_rolls_back_earlier_statements() {
        let f = fixture(&[(
            "notes/index.post.sql",
            "-- @wtf-store first\nINSERT INTO notes (body) VALUES ('kept?') RETURNING id;\n\
             SELECT * FROM missing_table;",
        )]);
        let err = f
            .engine
            .dispatch(IncomingRequest::new(Method::POST, "/notes/"), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, WtfError::Statement { index: 1, .. }));
        assert_eq!(note_count(&f.engine), 0);
    }

    #[test]
    fn test_relations_do_not_leak_between_requests() {
        let f = fixture(&[
            ("ok.get.sql", "SELECT value AS site FROM env_vars WHERE name = 'WTF_SITE';"),
            ("fail.get.sql", "SELECT wtf_abort(418, 'teapot');"),
        ]);
        let err = f
            .engine
            .dispatch(IncomingRequest::new(Method::GET, "/fail/"), &CancelFlag::new())
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::IM_A_TEAPOT);
        assert_eq!(err.to_string(), "teapot");

        for _ in 0..3 {
            let plan = handled(&f.engine, IncomingRequest::new(Method::GET, "/ok/"));
            assert_eq!(body_json(&plan), serde_json::json!([{"site": "demo"}]));
        }
    }

    #[test]
    fn test_json_body_and_capture() {
        let f = fixture(&[(
            "notes/index.post.sql",
            "-- @wtf-capture body single\n\
             SELECT value FROM request_json WHERE path = '$.note.body';\n\
             -- @wtf-capture id single\n\
             INSERT INTO notes (body) VALUES (:body) RETURNING id;\n\
             -- @wtf-store note\n\
             SELECT id, body FROM notes WHERE id = :id;",
        )]);
        let request = IncomingRequest::new(Method::POST, "/notes/")
            .header("Content-Type", "application/json")
            .body(r#"{"note": {"body": "from json"}}"#);
        let plan = handled(&f.engine, request);
        assert_eq!(
            body_json(&plan),
            serde_json::json!({"note": [{"id": 1, "body": "from json"}]})
        );
    }

    #[test]
    fn test_validation_error_is_client_error() {
        let f = fixture(&[(
            "notes/index.post.sql",
            "-- @wtf-validate body required,min=3\nINSERT INTO notes (body) VALUES (:body);",
        )]);
        let request = IncomingRequest::new(Method::POST, "/notes/?body=x");
        let err = f.engine.dispatch(request, &CancelFlag::new()).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(note_count(&f.engine), 0);
    }

    #[test]
    fn test_template_render_and_traversal() {
        let f = fixture(&[
            (
                "page.get.sql",
                "INSERT INTO response_meta VALUES ('wtf-tpl', 'page.html');\n\
                 -- @wtf-store rows\nSELECT 'Ada' AS name;",
            ),
            ("page.html", "{% for r in rows %}Hi {{ r.name }}{% endfor %}"),
            (
                "evil.get.sql",
                "INSERT INTO notes (body) VALUES ('x');\n\
                 INSERT INTO response_meta VALUES ('wtf-tpl', '../outside.html');",
            ),
        ]);
        let plan = handled(&f.engine, IncomingRequest::new(Method::GET, "/page/"));
        assert_eq!(plan.body, "Hi Ada");

        let err = f
            .engine
            .dispatch(IncomingRequest::new(Method::GET, "/evil/"), &CancelFlag::new())
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(note_count(&f.engine), 0);
    }

    #[test]
    fn test_cookie_domain_defaults_to_host() {
        let f = fixture(&[(
            "login.post.sql",
            "INSERT INTO response_cookies (name, value, max_age) VALUES ('session', 'abc', 60);",
        )]);
        let request = IncomingRequest::new(Method::POST, "/login/").header("Host", "example.com:8080");
        let plan = handled(&f.engine, request);
        assert_eq!(plan.cookies.len(), 1);
        assert_eq!(plan.cookies[0].domain.as_deref(), Some("example.com"));
        assert_eq!(plan.cookies[0].max_age, Some(60));
    }

    #[test]
    fn test_path_params_bound() {
        let f = fixture(&[("users/{id}.get.sql", "SELECT :id AS id, value AS meta FROM request_meta WHERE name = 'wtf';")]);
        let plan = handled(&f.engine, IncomingRequest::new(Method::GET, "/users/42/"));
        assert_eq!(body_json(&plan), serde_json::json!([{"id": "42", "meta": "100%"}]));
    }

    #[test]
    fn test_dispatch_outcomes() {
        let f = fixture(&[("users/index.get.sql", "SELECT 1;")]);
        let cancel = CancelFlag::new();
        assert!(matches!(
            f.engine.dispatch(IncomingRequest::new(Method::GET, "/users"), &cancel).unwrap(),
            Dispatch::Redirect(ref location) if location == "/users/"
        ));
        assert!(matches!(
            f.engine.dispatch(IncomingRequest::new(Method::DELETE, "/users/"), &cancel).unwrap(),
            Dispatch::MethodNotAllowed(_)
        ));
        assert!(matches!(
            f.engine.dispatch(IncomingRequest::new(Method::GET, "/nope/"), &cancel).unwrap(),
            Dispatch::NotFound
        ));
    }

    #[test]
    fn test_rebuild_publishes_new_routes() {
        let f = fixture(&[("a.get.sql", "SELECT 1;")]);
        assert_eq!(f.engine.route_entries().len(), 1);
        fs::write(f.engine.web_root().join("b.get.sql"), "SELECT 2;").unwrap();
        assert_eq!(f.engine.rebuild_routes().unwrap(), 2);
        assert_eq!(f.engine.rebuild_routes().unwrap(), 2);
        assert_eq!(f.engine.route_entries().len(), 2);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_table() {
        let f = fixture(&[("a.get.sql", "SELECT 1;")]);
        let db = f.engine.database().clone();
        let gone = Engine::new(EngineConfig::new(f.engine.web_root().join("missing")), db);
        assert!(gone.rebuild_routes().is_err());
        assert!(gone.routes().is_empty());
        assert_eq!(f.engine.routes().len(), 1);
    }

    #[test]
    fn test_cancelled_request_is_rolled_back() {
        let f = fixture(&[("slow.get.sql", "INSERT INTO notes (body) VALUES ('x');\nSELECT 1;")]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = f
            .engine
            .dispatch(IncomingRequest::new(Method::GET, "/slow/"), &cancel)
            .unwrap_err();
        assert!(matches!(err, WtfError::Cancelled));
        assert_eq!(note_count(&f.engine), 0);
    }

    #[test]
    fn test_values_survive_capture_types() {
        let f = fixture(&[(
            "n.get.sql",
            "-- @wtf-capture n single\nSELECT 41 + 1;\nSELECT :n AS n, typeof(:n) AS t;",
        )]);
        let plan = handled(&f.engine, IncomingRequest::new(Method::GET, "/n/"));
        assert_eq!(body_json(&plan), serde_json::json!([{"n": 42, "t": "integer"}]));
    }
}
