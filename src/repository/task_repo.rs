// ==========================================
// 受益人登记系统 - 审批任务仓储
// ==========================================
// 职责: task 表写入与查询
// 说明: 审批引擎本身在外部，这里只负责“投递”任务
//       TaskCreator 抽象投递动作，便于上层在同一事务内组合
// ==========================================

use crate::db::SharedConnection;
use crate::domain::task::{NewTask, Task};
use crate::domain::types::TaskStatus;
use crate::repository::error::{parse_json_column, parse_timestamp, RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};

/// 审批任务投递接口
///
/// conn 为调用方持有的事务连接，实现方不得自行开启事务
pub trait TaskCreator: Send + Sync {
    fn create_task_tx(
        &self,
        conn: &Connection,
        task: NewTask,
        created_by: &str,
    ) -> RepositoryResult<Task>;
}

pub struct TaskRepository {
    conn: SharedConnection,
}

impl TaskRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn list_by_entity(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<Task>> {
        let conn = self.get_conn()?;
        Self::list_by_entity_tx(&conn, entity_type, entity_id)
    }

    pub fn count_all(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM task", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn insert_tx(conn: &Connection, task: &Task) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO task (
                id, source, entity_type, entity_id, status, executor_action_event,
                business_event, json_ext, data, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                task.id,
                task.source,
                task.entity_type,
                task.entity_id,
                task.status.as_str(),
                task.executor_action_event,
                task.business_event,
                serde_json::to_string(&task.json_ext)?,
                serde_json::to_string(&task.data)?,
                task.created_by,
                task.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_by_entity_tx(
        conn: &Connection,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<Vec<Task>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source, entity_type, entity_id, status, executor_action_event,
                   business_event, json_ext, data, created_by, created_at
            FROM task WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at, rowid
            "#,
        )?;
        let rows = stmt.query_map(params![entity_type, entity_id], map_task_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

impl TaskCreator for TaskRepository {
    fn create_task_tx(
        &self,
        conn: &Connection,
        task: NewTask,
        created_by: &str,
    ) -> RepositoryResult<Task> {
        let task = task.into_task(created_by);
        Self::insert_tx(conn, &task)?;
        Ok(task)
    }
}

fn map_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    let json_ext: String = row.get(7)?;
    let data: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(Task {
        id: row.get(0)?,
        source: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        status: TaskStatus::parse(&status),
        executor_action_event: row.get(5)?,
        business_event: row.get(6)?,
        json_ext: parse_json_column(&json_ext),
        data: parse_json_column(&data),
        created_by: row.get(9)?,
        created_at: parse_timestamp(&created_at),
    })
}
