//! The Chess Rules Oracle (spec §6.2): position representation, legal move
//! generation, FEN/PGN serialization, and UCI move parsing.
//!
//! Adapted from the board/move-generation pair of a standalone chess engine
//! (array-of-64 board, FIDE move generation with check filtering) into the
//! narrower surface the state machine needs: legal moves filtered by source
//! square, [`Occupancy`](crate::occupancy::Occupancy) views of the position,
//! and UCI move text instead of a JSON wire format.

use crate::occupancy::Occupancy;
use std::fmt;

// ---------------------------------------------------------------------------
// Color, piece, square
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn pawn_start_rank(self) -> u8 {
        match self {
            Color::White => 1,
            Color::Black => 6,
        }
    }

    pub fn promotion_rank(self) -> u8 {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    pub fn pawn_direction(self) -> i8 {
        match self {
            Color::White => 1,
            Color::Black => -1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    pub fn to_fen_char(self) -> char {
        let c = match self.kind {
            PieceKind::King => 'K',
            PieceKind::Queen => 'Q',
            PieceKind::Rook => 'R',
            PieceKind::Bishop => 'B',
            PieceKind::Knight => 'N',
            PieceKind::Pawn => 'P',
        };
        match self.color {
            Color::White => c,
            Color::Black => c.to_ascii_lowercase(),
        }
    }

    pub fn from_fen_char(c: char) -> Option<Self> {
        let color = if c.is_uppercase() { Color::White } else { Color::Black };
        let kind = match c.to_ascii_uppercase() {
            'K' => PieceKind::King,
            'Q' => PieceKind::Queen,
            'R' => PieceKind::Rook,
            'B' => PieceKind::Bishop,
            'N' => PieceKind::Knight,
            'P' => PieceKind::Pawn,
            _ => return None,
        };
        Some(Piece { kind, color })
    }
}

/// A square on the board, 0-based file/rank. Its [`index`](Square::index)
/// is the bit position an [`Occupancy`] uses for the same square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

impl Square {
    pub fn new(file: u8, rank: u8) -> Self {
        debug_assert!(file < 8 && rank < 8, "square out of bounds");
        Self { file, rank }
    }

    pub fn from_index(index: u8) -> Self {
        Square::new(index % 8, index / 8)
    }

    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        if file < 8 && rank < 8 { Some(Square { file, rank }) } else { None }
    }

    pub fn to_algebraic(self) -> String {
        format!("{}{}", (b'a' + self.file) as char, self.rank + 1)
    }

    pub fn offset(self, df: i8, dr: i8) -> Option<Square> {
        let f = self.file as i8 + df;
        let r = self.rank as i8 + dr;
        if (0..8).contains(&f) && (0..8).contains(&r) {
            Some(Square::new(f as u8, r as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> u8 {
        self.rank * 8 + self.file
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Castling rights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SideCastlingRights {
    pub kingside: bool,
    pub queenside: bool,
}

impl Default for SideCastlingRights {
    fn default() -> Self {
        Self { kingside: true, queenside: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CastlingRights {
    pub white: SideCastlingRights,
    pub black: SideCastlingRights,
}

impl CastlingRights {
    pub fn for_color(&self, color: Color) -> &SideCastlingRights {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn for_color_mut(&mut self, color: Color) -> &mut SideCastlingRights {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn none() -> Self {
        Self {
            white: SideCastlingRights { kingside: false, queenside: false },
            black: SideCastlingRights { kingside: false, queenside: false },
        }
    }

    pub fn to_fen(&self) -> String {
        let mut s = String::new();
        if self.white.kingside {
            s.push('K');
        }
        if self.white.queenside {
            s.push('Q');
        }
        if self.black.kingside {
            s.push('k');
        }
        if self.black.queenside {
            s.push('q');
        }
        if s.is_empty() { "-".to_string() } else { s }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; 64],
}

impl Default for Board {
    fn default() -> Self {
        Self { squares: [None; 64] }
    }
}

impl Board {
    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index() as usize]
    }

    pub fn set(&mut self, sq: Square, piece: Option<Piece>) {
        self.squares[sq.index() as usize] = piece;
    }

    pub fn starting_position() -> Self {
        let mut board = Board::default();
        let mut place = |file: u8, rank: u8, kind: PieceKind, color: Color| {
            board.set(Square::new(file, rank), Some(Piece::new(kind, color)));
        };
        let back_rank = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        for (file, kind) in back_rank.iter().enumerate() {
            place(file as u8, 0, *kind, Color::White);
            place(file as u8, 7, *kind, Color::Black);
        }
        for file in 0..8u8 {
            place(file, 1, PieceKind::Pawn, Color::White);
            place(file, 6, PieceKind::Pawn, Color::Black);
        }
        board
    }

    pub fn find_king(&self, color: Color) -> Option<Square> {
        (0..64u8).map(Square::from_index).find(|&sq| {
            matches!(self.get(sq), Some(p) if p.kind == PieceKind::King && p.color == color)
        })
    }

    /// All squares holding a piece, as an [`Occupancy`].
    pub fn occupied(&self) -> Occupancy {
        let mut occ = Occupancy::EMPTY;
        for i in 0..64u8 {
            if self.squares[i as usize].is_some() {
                occ = occ.with(i);
            }
        }
        occ
    }

    /// Squares holding a piece of the given color.
    pub fn occupied_co(&self, color: Color) -> Occupancy {
        let mut occ = Occupancy::EMPTY;
        for i in 0..64u8 {
            if matches!(self.squares[i as usize], Some(p) if p.color == color) {
                occ = occ.with(i);
            }
        }
        occ
    }

    /// Squares holding a piece of the given kind and color.
    pub fn pieces(&self, kind: PieceKind, color: Color) -> Occupancy {
        let mut occ = Occupancy::EMPTY;
        for i in 0..64u8 {
            if matches!(self.squares[i as usize], Some(p) if p.kind == kind && p.color == color) {
                occ = occ.with(i);
            }
        }
        occ
    }

    /// Both kings, regardless of color.
    pub fn kings(&self) -> Occupancy {
        self.pieces(PieceKind::King, Color::White) | self.pieces(PieceKind::King, Color::Black)
    }

    pub fn to_piece_placement_fen(&self) -> String {
        let mut fen = String::new();
        for rank in (0..8u8).rev() {
            let mut empty_count = 0u32;
            for file in 0..8u8 {
                match self.get(Square::new(file, rank)) {
                    Some(piece) => {
                        if empty_count > 0 {
                            fen.push_str(&empty_count.to_string());
                            empty_count = 0;
                        }
                        fen.push(piece.to_fen_char());
                    }
                    None => empty_count += 1,
                }
            }
            if empty_count > 0 {
                fen.push_str(&empty_count.to_string());
            }
            if rank > 0 {
                fen.push('/');
            }
        }
        fen
    }
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChessMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
    pub is_castling: bool,
    pub is_en_passant: bool,
}

impl ChessMove {
    pub fn simple(from: Square, to: Square) -> Self {
        Self { from, to, promotion: None, is_castling: false, is_en_passant: false }
    }

    /// UCI move text, e.g. `"e2e4"` or `"e7e8q"`.
    pub fn uci(&self) -> String {
        let mut s = format!("{}{}", self.from.to_algebraic(), self.to.to_algebraic());
        if let Some(promo) = self.promotion {
            s.push(match promo {
                PieceKind::Queen => 'q',
                PieceKind::Rook => 'r',
                PieceKind::Bishop => 'b',
                PieceKind::Knight => 'n',
                _ => unreachable!("pawns/kings never appear as promotion targets"),
            });
        }
        s
    }
}

impl fmt::Display for ChessMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uci())
    }
}

/// Parses bare UCI move text (`"e2e4"`, `"e7e8q"`) into `(from, to, promotion)`.
/// Does not check legality — callers match the result against legal moves.
pub fn parse_uci(text: &str) -> Option<(Square, Square, Option<PieceKind>)> {
    let bytes = text.as_bytes();
    if bytes.len() != 4 && bytes.len() != 5 {
        return None;
    }
    let from = Square::from_algebraic(&text[0..2])?;
    let to = Square::from_algebraic(&text[2..4])?;
    let promotion = if bytes.len() == 5 {
        Some(match bytes[4].to_ascii_lowercase() {
            b'q' => PieceKind::Queen,
            b'r' => PieceKind::Rook,
            b'b' => PieceKind::Bishop,
            b'n' => PieceKind::Knight,
            _ => return None,
        })
    } else {
        None
    };
    Some((from, to, promotion))
}

// ---------------------------------------------------------------------------
// Attack detection & pseudo-legal generation
// ---------------------------------------------------------------------------

const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const QUEEN_DIRS: [(i8, i8); 8] = [
    (-1, 0), (1, 0), (0, -1), (0, 1), (-1, -1), (-1, 1), (1, -1), (1, 1),
];
const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1), (-2, 1), (-1, -2), (-1, 2), (1, -2), (1, 2), (2, -1), (2, 1),
];

pub fn is_square_attacked(board: &Board, sq: Square, attacker: Color) -> bool {
    for &(df, dr) in &KNIGHT_OFFSETS {
        if let Some(from) = sq.offset(df, dr)
            && matches!(board.get(from), Some(p) if p.color == attacker && p.kind == PieceKind::Knight)
        {
            return true;
        }
    }
    for df in -1..=1i8 {
        for dr in -1..=1i8 {
            if df == 0 && dr == 0 {
                continue;
            }
            if let Some(from) = sq.offset(df, dr)
                && matches!(board.get(from), Some(p) if p.color == attacker && p.kind == PieceKind::King)
            {
                return true;
            }
        }
    }
    let pawn_dir = attacker.pawn_direction();
    for df in [-1i8, 1] {
        if let Some(from) = sq.offset(df, -pawn_dir)
            && matches!(board.get(from), Some(p) if p.color == attacker && p.kind == PieceKind::Pawn)
        {
            return true;
        }
    }
    for &(df, dr) in &BISHOP_DIRS {
        let mut cur = sq;
        while let Some(next) = cur.offset(df, dr) {
            if let Some(piece) = board.get(next) {
                if piece.color == attacker
                    && matches!(piece.kind, PieceKind::Bishop | PieceKind::Queen)
                {
                    return true;
                }
                break;
            }
            cur = next;
        }
    }
    for &(df, dr) in &ROOK_DIRS {
        let mut cur = sq;
        while let Some(next) = cur.offset(df, dr) {
            if let Some(piece) = board.get(next) {
                if piece.color == attacker
                    && matches!(piece.kind, PieceKind::Rook | PieceKind::Queen)
                {
                    return true;
                }
                break;
            }
            cur = next;
        }
    }
    false
}

pub fn is_in_check(board: &Board, color: Color) -> bool {
    match board.find_king(color) {
        Some(king_sq) => is_square_attacked(board, king_sq, color.opponent()),
        None => false,
    }
}

fn generate_pseudo_legal_moves(
    board: &Board,
    turn: Color,
    castling: &CastlingRights,
    en_passant: Option<Square>,
) -> Vec<ChessMove> {
    let mut moves = Vec::with_capacity(64);
    for i in 0..64u8 {
        let from = Square::from_index(i);
        let piece = match board.get(from) {
            Some(p) if p.color == turn => p,
            _ => continue,
        };
        match piece.kind {
            PieceKind::King => generate_king_moves(board, from, turn, castling, &mut moves),
            PieceKind::Queen => generate_sliding_moves(board, from, turn, &QUEEN_DIRS, &mut moves),
            PieceKind::Rook => generate_sliding_moves(board, from, turn, &ROOK_DIRS, &mut moves),
            PieceKind::Bishop => generate_sliding_moves(board, from, turn, &BISHOP_DIRS, &mut moves),
            PieceKind::Knight => generate_knight_moves(board, from, turn, &mut moves),
            PieceKind::Pawn => generate_pawn_moves(board, from, turn, en_passant, &mut moves),
        }
    }
    moves
}

fn generate_sliding_moves(
    board: &Board,
    from: Square,
    color: Color,
    directions: &[(i8, i8)],
    moves: &mut Vec<ChessMove>,
) {
    for &(df, dr) in directions {
        let mut cur = from;
        while let Some(to) = cur.offset(df, dr) {
            match board.get(to) {
                None => {
                    moves.push(ChessMove::simple(from, to));
                    cur = to;
                }
                Some(target) => {
                    if target.color != color {
                        moves.push(ChessMove::simple(from, to));
                    }
                    break;
                }
            }
        }
    }
}

fn generate_knight_moves(board: &Board, from: Square, color: Color, moves: &mut Vec<ChessMove>) {
    for &(df, dr) in &KNIGHT_OFFSETS {
        if let Some(to) = from.offset(df, dr)
            && !matches!(board.get(to), Some(p) if p.color == color)
        {
            moves.push(ChessMove::simple(from, to));
        }
    }
}

fn generate_king_moves(
    board: &Board,
    from: Square,
    color: Color,
    castling: &CastlingRights,
    moves: &mut Vec<ChessMove>,
) {
    for df in -1..=1i8 {
        for dr in -1..=1i8 {
            if df == 0 && dr == 0 {
                continue;
            }
            if let Some(to) = from.offset(df, dr)
                && !matches!(board.get(to), Some(p) if p.color == color)
            {
                moves.push(ChessMove::simple(from, to));
            }
        }
    }

    let rights = castling.for_color(color);
    let rank = match color {
        Color::White => 0u8,
        Color::Black => 7u8,
    };
    let king_start = Square::new(4, rank);
    if from != king_start || is_square_attacked(board, from, color.opponent()) {
        return;
    }

    if rights.kingside {
        let f_sq = Square::new(5, rank);
        let g_sq = Square::new(6, rank);
        let rook_sq = Square::new(7, rank);
        let path_clear = board.get(f_sq).is_none() && board.get(g_sq).is_none();
        let rook_present =
            matches!(board.get(rook_sq), Some(Piece { kind: PieceKind::Rook, color: c }) if c == color);
        let safe = !is_square_attacked(board, f_sq, color.opponent())
            && !is_square_attacked(board, g_sq, color.opponent());
        if path_clear && rook_present && safe {
            moves.push(ChessMove { from, to: g_sq, promotion: None, is_castling: true, is_en_passant: false });
        }
    }
    if rights.queenside {
        let d_sq = Square::new(3, rank);
        let c_sq = Square::new(2, rank);
        let b_sq = Square::new(1, rank);
        let rook_sq = Square::new(0, rank);
        let path_clear = board.get(d_sq).is_none() && board.get(c_sq).is_none() && board.get(b_sq).is_none();
        let rook_present =
            matches!(board.get(rook_sq), Some(Piece { kind: PieceKind::Rook, color: c }) if c == color);
        let safe = !is_square_attacked(board, d_sq, color.opponent())
            && !is_square_attacked(board, c_sq, color.opponent());
        if path_clear && rook_present && safe {
            moves.push(ChessMove { from, to: c_sq, promotion: None, is_castling: true, is_en_passant: false });
        }
    }
}

fn generate_pawn_moves(
    board: &Board,
    from: Square,
    color: Color,
    en_passant: Option<Square>,
    moves: &mut Vec<ChessMove>,
) {
    let dir = color.pawn_direction();
    let start_rank = color.pawn_start_rank();
    let promo_rank = color.promotion_rank();

    let mut add_move = |from: Square, to: Square, is_ep: bool| {
        if to.rank == promo_rank {
            for kind in [PieceKind::Queen, PieceKind::Rook, PieceKind::Bishop, PieceKind::Knight] {
                moves.push(ChessMove { from, to, promotion: Some(kind), is_castling: false, is_en_passant: false });
            }
        } else {
            moves.push(ChessMove { from, to, promotion: None, is_castling: false, is_en_passant: is_ep });
        }
    };

    if let Some(one_ahead) = from.offset(0, dir)
        && board.get(one_ahead).is_none()
    {
        add_move(from, one_ahead, false);
        if from.rank == start_rank
            && let Some(two_ahead) = from.offset(0, dir * 2)
            && board.get(two_ahead).is_none()
        {
            add_move(from, two_ahead, false);
        }
    }

    for df in [-1i8, 1] {
        if let Some(to) = from.offset(df, dir) {
            if let Some(target) = board.get(to)
                && target.color != color
            {
                add_move(from, to, false);
            }
            if let Some(ep_sq) = en_passant
                && to == ep_sq
            {
                add_move(from, to, true);
            }
        }
    }
}

pub fn generate_legal_moves(
    board: &Board,
    turn: Color,
    castling: &CastlingRights,
    en_passant: Option<Square>,
) -> Vec<ChessMove> {
    generate_pseudo_legal_moves(board, turn, castling, en_passant)
        .into_iter()
        .filter(|mv| {
            let mut test_board = board.clone();
            apply_move_to_board(&mut test_board, mv, turn);
            !is_in_check(&test_board, turn)
        })
        .collect()
}

pub fn apply_move_to_board(board: &mut Board, mv: &ChessMove, color: Color) {
    let piece = board.get(mv.from).expect("no piece on move source square");
    board.set(mv.from, None);

    if mv.is_castling {
        let rank = mv.from.rank;
        if mv.to.file == 6 {
            let rook = board.get(Square::new(7, rank));
            board.set(Square::new(7, rank), None);
            board.set(Square::new(5, rank), rook);
        } else if mv.to.file == 2 {
            let rook = board.get(Square::new(0, rank));
            board.set(Square::new(0, rank), None);
            board.set(Square::new(3, rank), rook);
        }
    }

    if mv.is_en_passant {
        let captured_rank = match color {
            Color::White => mv.to.rank - 1,
            Color::Black => mv.to.rank + 1,
        };
        board.set(Square::new(mv.to.file, captured_rank), None);
    }

    let placed = if let Some(promo_kind) = mv.promotion { Piece::new(promo_kind, color) } else { piece };
    board.set(mv.to, Some(placed));
}

pub fn is_insufficient_material(board: &Board) -> bool {
    let mut white_non_king: Vec<(PieceKind, Square)> = Vec::new();
    let mut black_non_king: Vec<(PieceKind, Square)> = Vec::new();
    for i in 0..64u8 {
        let sq = Square::from_index(i);
        if let Some(piece) = board.get(sq)
            && piece.kind != PieceKind::King
        {
            match piece.color {
                Color::White => white_non_king.push((piece.kind, sq)),
                Color::Black => black_non_king.push((piece.kind, sq)),
            }
        }
    }
    match (white_non_king.len(), black_non_king.len()) {
        (0, 0) => true,
        (0, 1) => matches!(black_non_king[0].0, PieceKind::Bishop | PieceKind::Knight),
        (1, 0) => matches!(white_non_king[0].0, PieceKind::Bishop | PieceKind::Knight),
        (1, 1) => {
            let (wk, wsq) = white_non_king[0];
            let (bk, bsq) = black_non_king[0];
            wk == PieceKind::Bishop
                && bk == PieceKind::Bishop
                && (wsq.file + wsq.rank) % 2 == (bsq.file + bsq.rank) % 2
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Position — the mutable game-position oracle the state machine queries
// ---------------------------------------------------------------------------

/// A chess position: board, side to move, castling rights, en passant
/// target, and the move/halfmove counters FEN needs.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    turn: Color,
    castling: CastlingRights,
    en_passant: Option<Square>,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Position {
    pub fn starting() -> Self {
        Self {
            board: Board::starting_position(),
            turn: Color::White,
            castling: CastlingRights::default(),
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn occupied(&self) -> Occupancy {
        self.board.occupied()
    }

    pub fn occupied_co(&self, color: Color) -> Occupancy {
        self.board.occupied_co(color)
    }

    pub fn pieces(&self, kind: PieceKind, color: Color) -> Occupancy {
        self.board.pieces(kind, color)
    }

    pub fn kings(&self) -> Occupancy {
        self.board.kings()
    }

    pub fn legal_moves(&self) -> Vec<ChessMove> {
        generate_legal_moves(&self.board, self.turn, &self.castling, self.en_passant)
    }

    /// Legal moves whose source square is `src`.
    pub fn legal_moves_from(&self, src: Square) -> Vec<ChessMove> {
        self.legal_moves().into_iter().filter(|m| m.from == src).collect()
    }

    /// Destination squares of all legal moves from `src`, as an [`Occupancy`].
    pub fn legal_dests_from(&self, src: Square) -> Occupancy {
        self.legal_moves_from(src)
            .into_iter()
            .fold(Occupancy::EMPTY, |acc, m| acc.with(m.to.index()))
    }

    /// The single legal move from `src` to `dst`, if any (ignores promotion
    /// piece — callers that need a specific promotion should filter
    /// `legal_moves_from` themselves).
    pub fn find_move(&self, src: Square, dst: Square) -> Option<ChessMove> {
        self.legal_moves_from(src).into_iter().find(|m| m.to == dst)
    }

    /// The move matching a promotion-qualified UCI string, if legal.
    pub fn find_move_uci(&self, uci: &str) -> Option<ChessMove> {
        let (from, to, promotion) = parse_uci(uci)?;
        self.legal_moves_from(from)
            .into_iter()
            .find(|m| m.to == to && m.promotion == promotion)
    }

    pub fn is_checkmate(&self) -> bool {
        self.legal_moves().is_empty() && is_in_check(&self.board, self.turn)
    }

    pub fn is_stalemate(&self) -> bool {
        self.legal_moves().is_empty() && !is_in_check(&self.board, self.turn)
    }

    pub fn is_insufficient_material(&self) -> bool {
        is_insufficient_material(&self.board)
    }

    /// 50-move rule draw claim (a player "claiming" is represented as this
    /// becoming available once the halfmove clock reaches 100 plies).
    pub fn can_claim_fifty_move(&self) -> bool {
        self.halfmove_clock >= 100
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    /// Applies a legal move in place. The caller is responsible for having
    /// obtained `mv` from this same position (e.g. via [`find_move`] or
    /// [`find_move_uci`]); applying a move from a different position is a
    /// logic error but will not panic except via the `expect` inside
    /// [`apply_move_to_board`] if the source square is empty.
    pub fn make_move(&mut self, mv: ChessMove) {
        let moving_piece = self.board.get(mv.from).expect("move source square is empty");
        let is_pawn_move = moving_piece.kind == PieceKind::Pawn;
        let is_capture = self.board.get(mv.to).is_some() || mv.is_en_passant;

        apply_move_to_board(&mut self.board, &mv, self.turn);
        self.update_castling_rights(&mv);

        self.en_passant = None;
        if is_pawn_move {
            let rank_diff = (mv.to.rank as i8 - mv.from.rank as i8).abs();
            if rank_diff == 2 {
                let ep_rank = (mv.from.rank as i8 + self.turn.pawn_direction()) as u8;
                self.en_passant = Some(Square::new(mv.from.file, ep_rank));
            }
        }

        if is_pawn_move || is_capture {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }

        self.turn = self.turn.opponent();
        if self.turn == Color::White {
            self.fullmove_number += 1;
        }
    }

    fn update_castling_rights(&mut self, mv: &ChessMove) {
        if let Some(piece) = self.board.get(mv.to)
            && piece.kind == PieceKind::King
        {
            let rights = self.castling.for_color_mut(piece.color);
            rights.kingside = false;
            rights.queenside = false;
        }
        let mut clear_rook_rights = |sq: Square| {
            if sq == Square::new(7, 0) {
                self.castling.white.kingside = false;
            }
            if sq == Square::new(0, 0) {
                self.castling.white.queenside = false;
            }
            if sq == Square::new(7, 7) {
                self.castling.black.kingside = false;
            }
            if sq == Square::new(0, 7) {
                self.castling.black.queenside = false;
            }
        };
        clear_rook_rights(mv.from);
        clear_rook_rights(mv.to);
    }

    /// Full FEN string for the position.
    pub fn fen(&self) -> String {
        let ep = match self.en_passant {
            Some(sq) => sq.to_algebraic(),
            None => "-".to_string(),
        };
        format!(
            "{} {} {} {} {} {}",
            self.board.to_piece_placement_fen(),
            if self.turn == Color::White { 'w' } else { 'b' },
            self.castling.to_fen(),
            ep,
            self.halfmove_clock,
            self.fullmove_number,
        )
    }

    /// Parses a full FEN string, used for the remote-peer link's optional
    /// custom starting position (spec §6.3 `startFen`). Rejects malformed
    /// field counts or an unreadable piece-placement field; does not
    /// validate that the position is reachable by legal play.
    pub fn from_fen(fen: &str) -> Option<Self> {
        let mut fields = fen.split_whitespace();
        let placement = fields.next()?;
        let turn = match fields.next()? {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return None,
        };
        let castling_field = fields.next()?;
        let ep_field = fields.next()?;
        let halfmove_clock: u32 = fields.next().unwrap_or("0").parse().ok()?;
        let fullmove_number: u32 = fields.next().unwrap_or("1").parse().ok()?;

        let mut board = Board::default();
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return None;
        }
        for (rank_from_top, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - rank_from_top as u8;
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as u8;
                } else {
                    let piece = Piece::from_fen_char(c)?;
                    if file >= 8 {
                        return None;
                    }
                    board.set(Square::new(file, rank), Some(piece));
                    file += 1;
                }
            }
            if file != 8 {
                return None;
            }
        }

        let mut castling = CastlingRights::none();
        if castling_field != "-" {
            for c in castling_field.chars() {
                match c {
                    'K' => castling.white.kingside = true,
                    'Q' => castling.white.queenside = true,
                    'k' => castling.black.kingside = true,
                    'q' => castling.black.queenside = true,
                    _ => return None,
                }
            }
        }

        let en_passant = if ep_field == "-" { None } else { Some(Square::from_algebraic(ep_field)?) };

        Some(Self { board, turn, castling, en_passant, halfmove_clock, fullmove_number })
    }

    /// Position-only FEN (board + turn + castling + en passant), used for
    /// repetition detection where move counters must not distinguish
    /// otherwise-identical positions.
    pub fn repetition_key(&self) -> String {
        let ep = match self.en_passant {
            Some(sq) => sq.to_algebraic(),
            None => "-".to_string(),
        };
        format!(
            "{} {} {} {}",
            self.board.to_piece_placement_fen(),
            if self.turn == Color::White { 'w' } else { 'b' },
            self.castling.to_fen(),
            ep,
        )
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::starting()
    }
}

// ---------------------------------------------------------------------------
// PGN
// ---------------------------------------------------------------------------

/// Minimal PGN headers carried by an archived game.
#[derive(Debug, Clone)]
pub struct PgnHeaders {
    pub event: String,
    pub site: String,
    pub round: String,
    pub white: String,
    pub black: String,
    pub result: String,
}

/// Builds PGN text (headers + movetext) from a UCI move history and the
/// position each move was played from, replaying from the starting
/// position so SAN-ish move numbering matches move count.
pub fn build_pgn(headers: &PgnHeaders, uci_moves: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!("[Event \"{}\"]\n", headers.event));
    out.push_str(&format!("[Site \"{}\"]\n", headers.site));
    out.push_str(&format!("[Round \"{}\"]\n", headers.round));
    out.push_str(&format!("[White \"{}\"]\n", headers.white));
    out.push_str(&format!("[Black \"{}\"]\n", headers.black));
    out.push_str(&format!("[Result \"{}\"]\n\n", headers.result));

    let mut pos = Position::starting();
    for (i, uci) in uci_moves.iter().enumerate() {
        if i % 2 == 0 {
            out.push_str(&format!("{}. ", i / 2 + 1));
        }
        let mv = pos
            .find_move_uci(uci)
            .unwrap_or_else(|| panic!("PGN history contains illegal move {uci}"));
        out.push_str(&move_to_san(&pos, &mv));
        out.push(' ');
        pos.make_move(mv);
    }
    out.push_str(&headers.result);
    out.push('\n');
    out
}

/// Minimal SAN renderer: disambiguation is not attempted beyond the piece
/// letter, which is correct for pawn moves/captures and acceptable for the
/// archive's human-readability purpose (full SAN disambiguation is not a
/// goal of the archive format).
fn move_to_san(pos: &Position, mv: &ChessMove) -> String {
    if mv.is_castling {
        return if mv.to.file == 6 { "O-O".to_string() } else { "O-O-O".to_string() };
    }
    let piece = pos.board.get(mv.from).expect("SAN source square is empty");
    let is_capture = pos.board.get(mv.to).is_some() || mv.is_en_passant;
    let mut san = String::new();
    match piece.kind {
        PieceKind::Pawn => {
            if is_capture {
                san.push((b'a' + mv.from.file) as char);
                san.push('x');
            }
        }
        PieceKind::King => san.push('K'),
        PieceKind::Queen => san.push('Q'),
        PieceKind::Rook => san.push('R'),
        PieceKind::Bishop => san.push('B'),
        PieceKind::Knight => san.push('N'),
    }
    if piece.kind != PieceKind::Pawn && is_capture {
        san.push('x');
    }
    san.push_str(&mv.to.to_algebraic());
    if let Some(promo) = mv.promotion {
        san.push('=');
        san.push(match promo {
            PieceKind::Queen => 'Q',
            PieceKind::Rook => 'R',
            PieceKind::Bishop => 'B',
            PieceKind::Knight => 'N',
            _ => unreachable!(),
        });
    }
    san
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_position_has_20_legal_moves() {
        let pos = Position::starting();
        assert_eq!(pos.legal_moves().len(), 20);
    }

    #[test]
    fn uci_round_trip() {
        let pos = Position::starting();
        let mv = pos.find_move_uci("e2e4").expect("e2e4 is legal from the start");
        assert_eq!(mv.uci(), "e2e4");
    }

    #[test]
    fn scholars_mate_ends_in_checkmate() {
        let mut pos = Position::starting();
        for uci in ["e2e4", "e7e5", "d1h5", "b8c6", "f1c4", "g8f6", "h5f7"] {
            let mv = pos.find_move_uci(uci).unwrap_or_else(|| panic!("{uci} should be legal"));
            pos.make_move(mv);
        }
        assert!(pos.is_checkmate());
    }

    #[test]
    fn insufficient_material_k_vs_k() {
        let mut board = Board::default();
        board.set(Square::new(4, 0), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(Square::new(4, 7), Some(Piece::new(PieceKind::King, Color::Black)));
        assert!(is_insufficient_material(&board));
    }

    #[test]
    fn fen_round_trips_through_starting_position() {
        let pos = Position::starting();
        let parsed = Position::from_fen(&pos.fen()).expect("starting FEN parses");
        assert_eq!(parsed.fen(), pos.fen());
    }

    #[test]
    fn from_fen_rejects_malformed_placement() {
        assert!(Position::from_fen("not a fen string").is_none());
    }

    #[test]
    fn legal_dests_from_matches_legal_moves_from() {
        let pos = Position::starting();
        let e2 = Square::from_algebraic("e2").unwrap();
        let dests = pos.legal_dests_from(e2);
        assert_eq!(dests.popcount(), 2);
        assert!(dests.contains(Square::from_algebraic("e3").unwrap().index()));
        assert!(dests.contains(Square::from_algebraic("e4").unwrap().index()));
    }

    #[test]
    fn pgn_round_trips_move_count() {
        let headers = PgnHeaders {
            event: "Test".into(),
            site: "?".into(),
            round: "1".into(),
            white: "Human".into(),
            black: "Engine".into(),
            result: "*".into(),
        };
        let moves = vec!["e2e4".to_string(), "e7e5".to_string()];
        let pgn = build_pgn(&headers, &moves);
        assert!(pgn.contains("1. e4 e5"));
    }
}
